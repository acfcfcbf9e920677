//! The standard per-protocol shutdown step sequence (spec §4.5).
//!
//! Every protocol server hands this same five-step list to a
//! [`ShutdownOrchestrator`](crate::shutdown::ShutdownOrchestrator):
//! stop accepting, wait for natural completion, force-close what's left,
//! protocol-specific force shutdown, then cleanup. Steps 1-3 are
//! protocol-agnostic and operate purely against the pool; step 4 is the
//! only one that reaches into the concrete [`ProtocolServer`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::pool::ConnectionPool;
use crate::protocol::ProtocolServer;

struct StopAccepting {
    server: Arc<dyn ProtocolServer>,
}

#[async_trait]
impl crate::shutdown::ShutdownStep for StopAccepting {
    fn name(&self) -> &str {
        "stop_accepting_connections"
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.server.stop_accepting();
        Ok(())
    }
}

struct WaitConnectionsCompletion {
    pool: Arc<ConnectionPool>,
}

#[async_trait]
impl crate::shutdown::ShutdownStep for WaitConnectionsCompletion {
    fn name(&self) -> &str {
        "wait_connections_completion"
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    fn max_attempts(&self) -> u32 {
        2 // 1 + retryCount(1), per spec.md §4.5 step 2
    }

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            if self.pool.metrics().current_connections == 0 {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

struct ForceCloseConnections {
    pool: Arc<ConnectionPool>,
}

#[async_trait]
impl crate::shutdown::ShutdownStep for ForceCloseConnections {
    fn name(&self) -> &str {
        "force_close_connections"
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.pool.close_all().await;
        Ok(())
    }
}

struct ProtocolForceShutdown {
    server: Arc<dyn ProtocolServer>,
}

#[async_trait]
impl crate::shutdown::ShutdownStep for ProtocolForceShutdown {
    fn name(&self) -> &str {
        "protocol_force_shutdown"
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(3)
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.server.force_close_connections();
        Ok(())
    }
}

struct StopMonitoringCleanup {
    pool: Arc<ConnectionPool>,
}

#[async_trait]
impl crate::shutdown::ShutdownStep for StopMonitoringCleanup {
    fn name(&self) -> &str {
        "stop_monitoring_cleanup"
    }

    fn required(&self) -> bool {
        false
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(3)
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Any stragglers surviving the force-close step are swept here;
        // the pool's own timer registry has already been cleared by
        // `close_all`, so this is a best-effort final pass.
        self.pool.sweep_stale().await;
        Ok(())
    }
}

/// Build the standard §4.5 step list for one protocol server/pool pair.
pub fn standard_steps(
    server: Arc<dyn ProtocolServer>,
    pool: Arc<ConnectionPool>,
) -> Vec<Box<dyn crate::shutdown::ShutdownStep>> {
    vec![
        Box::new(StopAccepting {
            server: server.clone(),
        }),
        Box::new(WaitConnectionsCompletion { pool: pool.clone() }),
        Box::new(ForceCloseConnections { pool: pool.clone() }),
        Box::new(ProtocolForceShutdown { server }),
        Box::new(StopMonitoringCleanup { pool }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ListeningOptions, Protocol};
    use crate::dispatch::{DispatchWrapper, DrainGate};
    use crate::handler::{RequestHandler, RequestPayload, ResponsePayload};
    use crate::protocol::http::HttpServer;
    use crate::shutdown::{ShutdownOptions, ShutdownOrchestrator, ShutdownStatus};
    use crate::trace::TraceContext;

    struct Echo;

    #[async_trait::async_trait]
    impl RequestHandler for Echo {
        async fn handle(
            &self,
            _ctx: &TraceContext,
            request: RequestPayload,
        ) -> Result<ResponsePayload, Box<dyn std::error::Error + Send + Sync>> {
            Ok(ResponsePayload { body: request.body })
        }
    }

    #[tokio::test]
    async fn empty_pool_completes_immediately() {
        let pool = Arc::new(ConnectionPool::spawn(4, Duration::from_secs(60)));
        let options = ListeningOptions::builder(Protocol::Http, "127.0.0.1", 0)
            .build()
            .unwrap();
        let server: Arc<dyn ProtocolServer> = Arc::new(HttpServer::new(
            options,
            pool.clone(),
            DispatchWrapper::new(DrainGate::new(), Duration::from_secs(1)),
            Arc::new(Echo),
        ));

        let steps = standard_steps(server, pool);
        let orchestrator = ShutdownOrchestrator::new(steps, ShutdownOptions::default());
        let result = orchestrator.perform().await.unwrap();
        assert_eq!(result.status, ShutdownStatus::Completed);
        assert_eq!(result.steps.len(), 5);
    }

    #[tokio::test]
    async fn connection_completing_mid_wait_lets_shutdown_complete() {
        let pool = Arc::new(ConnectionPool::spawn(4, Duration::from_secs(60)));
        pool.try_admit("lingering", "http", None).await.unwrap();
        let options = ListeningOptions::builder(Protocol::Http, "127.0.0.1", 0)
            .build()
            .unwrap();
        let server: Arc<dyn ProtocolServer> = Arc::new(HttpServer::new(
            options,
            pool.clone(),
            DispatchWrapper::new(DrainGate::new(), Duration::from_secs(1)),
            Arc::new(Echo),
        ));

        let release_pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = release_pool.release("lingering", "client_closed").await;
        });

        let steps = standard_steps(server, pool.clone());
        let orchestrator = ShutdownOrchestrator::new(steps, ShutdownOptions::default());
        let result = orchestrator.perform().await.unwrap();
        assert_eq!(result.status, ShutdownStatus::Completed);
        assert_eq!(pool.metrics().current_connections, 0);
    }
}
