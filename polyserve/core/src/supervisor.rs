//! Multi-protocol supervisor.
//!
//! Owns a set of `(protocol server, pool, shutdown orchestrator)` triples
//! keyed by `(protocol, port)` and exposes the unified start/stop/
//! reconfigure contract the rest of the system drives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{ListeningOptions, Protocol};
use crate::dispatch::{DispatchWrapper, DrainGate};
use crate::error::SupervisorError;
use crate::handler::RequestHandler;
use crate::pool::ConnectionPool;
use crate::protocol::grpc::GrpcServer;
use crate::protocol::http::HttpServer;
use crate::protocol::ws::WsServer;
use crate::protocol::ProtocolServer;
use crate::shutdown::{ShutdownOptions, ShutdownOrchestrator, ShutdownResult};
use crate::shutdown_steps::standard_steps;

type Key = (Protocol, u16);

struct Entry {
    server: Arc<dyn ProtocolServer>,
    pool: Arc<ConnectionPool>,
    gate: DrainGate,
    options: ListeningOptions,
}

/// Owns every configured protocol listener and coordinates their combined
/// lifecycle. One [`Supervisor`] typically backs one running process.
pub struct Supervisor {
    handler: Arc<dyn RequestHandler>,
    entries: RwLock<HashMap<Key, Entry>>,
    shutdown_deadline: std::time::Duration,
    started: AtomicBool,
}

impl Supervisor {
    /// Build a supervisor that will dispatch every protocol's requests to
    /// `handler`, with a shared global shutdown deadline.
    #[must_use]
    pub fn new(handler: Arc<dyn RequestHandler>, shutdown_deadline: std::time::Duration) -> Self {
        Self {
            handler,
            entries: RwLock::new(HashMap::new()),
            shutdown_deadline,
            started: AtomicBool::new(false),
        }
    }

    /// Register a listener for `options`. Must be called before `start()`.
    pub async fn add_listener(&self, options: ListeningOptions) {
        let key = (options.protocol, options.port);
        let pool = Arc::new(ConnectionPool::spawn(options.max_connections, options.idle_timeout));
        let gate = DrainGate::new();
        let dispatch = DispatchWrapper::new(gate.clone(), options.request_timeout);

        let server: Arc<dyn ProtocolServer> = match options.protocol {
            Protocol::Http | Protocol::Https | Protocol::Http2 => Arc::new(HttpServer::new(
                options.clone(),
                pool.clone(),
                dispatch,
                self.handler.clone(),
            )),
            Protocol::Grpc => Arc::new(GrpcServer::new(
                options.clone(),
                pool.clone(),
                dispatch,
                self.handler.clone(),
            )),
            Protocol::Ws => Arc::new(WsServer::new(
                options.clone(),
                pool.clone(),
                dispatch,
                self.handler.clone(),
            )),
        };

        self.entries.write().await.insert(
            key,
            Entry {
                server,
                pool,
                gate,
                options,
            },
        );
    }

    /// Start every registered listener concurrently. Resolves once all
    /// listeners are bound, or returns the first bind error after stopping
    /// any sibling listener that did manage to start.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyStarted);
        }

        let entries = self.entries.read().await;
        let mut futures = Vec::with_capacity(entries.len());
        for entry in entries.values() {
            let server = entry.server.clone();
            futures.push(async move { (server.protocol(), server.start().await) });
        }
        drop(entries);

        let results = join_all(futures).await;
        let mut first_error = None;
        for (protocol, result) in results {
            if let Err(err) = result {
                warn!(?protocol, %err, "listener failed to start");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        if let Some(err) = first_error {
            self.stop_accepting_all().await;
            self.started.store(false, Ordering::SeqCst);
            return Err(err);
        }

        info!("supervisor started all listeners");
        Ok(())
    }

    async fn stop_accepting_all(&self) {
        let entries = self.entries.read().await;
        for entry in entries.values() {
            entry.server.stop_accepting();
        }
    }

    /// Run the standard shutdown step sequence (§4.5) against every
    /// registered listener's pool, returning once every result is
    /// terminal. Each protocol's shutdown runs independently and
    /// concurrently; their [`ShutdownResult`]s are returned keyed by
    /// `(protocol, port)`.
    pub async fn stop(&self) -> HashMap<(Protocol, u16), ShutdownResult> {
        if !self.started.swap(false, Ordering::SeqCst) {
            warn!("stop() called while supervisor was not running");
        }

        let entries = self.entries.read().await;
        let mut futures = Vec::with_capacity(entries.len());
        for (key, entry) in entries.iter() {
            entry.gate.begin_draining();
            entry.server.stop_accepting();
            let steps = standard_steps(entry.server.clone(), entry.pool.clone());
            let orchestrator =
                ShutdownOrchestrator::new(steps, ShutdownOptions {
                    global_deadline: self.shutdown_deadline,
                    ..ShutdownOptions::default()
                });
            let key = *key;
            futures.push(async move {
                let result = orchestrator.perform().await.unwrap_or_else(|_| {
                    // `perform` is infallible in the current orchestrator;
                    // this arm exists defensively if that ever changes.
                    crate::shutdown::ShutdownResult {
                        steps: Vec::new(),
                        status: crate::shutdown::ShutdownStatus::Failed,
                        total_elapsed: std::time::Duration::ZERO,
                    }
                });
                (key, result)
            });
        }
        drop(entries);

        join_all(futures).await.into_iter().collect()
    }

    /// Return the native listener handle for the given protocol/port, or
    /// the first registered listener if neither is specified.
    pub async fn native_server(
        &self,
        protocol: Option<Protocol>,
        port: Option<u16>,
    ) -> Option<Arc<dyn ProtocolServer>> {
        let entries = self.entries.read().await;
        match (protocol, port) {
            (Some(p), Some(port)) => entries.get(&(p, port)).map(|e| e.server.clone()),
            (Some(p), None) => entries
                .iter()
                .find(|((proto, _), _)| *proto == p)
                .map(|(_, e)| e.server.clone()),
            _ => entries.values().next().map(|e| e.server.clone()),
        }
    }

    /// Compare `new_options` against the current options for its
    /// `(protocol, port)` key. If `host`/`port` changed, stops then
    /// restarts that single listener with the new options. Returns
    /// whether any change was applied.
    pub async fn update_config(&self, new_options: ListeningOptions) -> Result<bool, SupervisorError> {
        let key = (new_options.protocol, new_options.port);
        let needs_restart = {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) => {
                    entry.options.host != new_options.host || entry.options.port != new_options.port
                }
                None => true,
            }
        };

        if !needs_restart {
            return Ok(false);
        }

        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.remove(&key) {
                entry.gate.begin_draining();
                entry.server.stop_accepting();
                let steps = standard_steps(entry.server.clone(), entry.pool.clone());
                let orchestrator = ShutdownOrchestrator::new(
                    steps,
                    ShutdownOptions {
                        global_deadline: self.shutdown_deadline,
                        ..ShutdownOptions::default()
                    },
                );
                let _ = orchestrator.perform().await;
            }
        }

        self.add_listener(new_options.clone()).await;
        if let Some(entry) = self.entries.read().await.get(&key) {
            entry.server.start().await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{RequestPayload, ResponsePayload};
    use crate::trace::TraceContext;
    use std::time::Duration;

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
    async fn starting_twice_errors() {
        let supervisor = Supervisor::new(Arc::new(Echo), Duration::from_secs(5));
        supervisor
            .add_listener(
                ListeningOptions::builder(Protocol::Http, "127.0.0.1", 0)
                    .build()
                    .unwrap(),
            )
            .await;
        supervisor.start().await.unwrap();
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyStarted));
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn stop_returns_terminal_result_per_listener() {
        let supervisor = Supervisor::new(Arc::new(Echo), Duration::from_secs(5));
        supervisor
            .add_listener(
                ListeningOptions::builder(Protocol::Http, "127.0.0.1", 0)
                    .build()
                    .unwrap(),
            )
            .await;
        supervisor.start().await.unwrap();
        let results = supervisor.stop().await;
        assert_eq!(results.len(), 1);
    }
}
