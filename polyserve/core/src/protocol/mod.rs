//! Protocol server implementations.
//!
//! Each submodule binds a concrete wire protocol to the shared
//! [`crate::pool::ConnectionPool`] and [`crate::dispatch::DispatchWrapper`].
//! Wire codecs and request routing are intentionally shallow here — this
//! crate's job is the listener lifecycle, admission, and shutdown
//! integration, not a full HTTP/gRPC/WebSocket framework.

pub mod grpc;
pub mod http;
pub mod ws;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{ListeningOptions, Protocol};
use crate::dispatch::DispatchWrapper;
use crate::error::SupervisorError;
use crate::handler::RequestHandler;
use crate::pool::ConnectionPool;

/// Lifecycle contract the supervisor drives for every protocol listener.
#[async_trait]
pub trait ProtocolServer: Send + Sync {
    /// Which protocol this server implements.
    fn protocol(&self) -> Protocol;

    /// Bind the listener and start accepting connections in the background.
    async fn start(&self) -> Result<(), SupervisorError>;

    /// Stop accepting new connections. Does not wait for in-flight work;
    /// the supervisor drives draining separately via the pool and
    /// dispatch wrapper's drain gate.
    fn stop_accepting(&self);

    /// Local address the listener bound to, once started.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Unconditionally terminate every still-running connection task this
    /// server owns, bypassing graceful completion. Invoked by the
    /// `protocol_force_shutdown` step once `wait_connections_completion`
    /// and `force_close_connections` have had their chance. Default no-op
    /// for servers that track no per-connection task handles.
    fn force_close_connections(&self) {}
}

/// Shared accept-loop plumbing used by every concrete protocol server:
/// bind a `TcpListener`, loop accepting with a bounded timeout so the
/// shutdown flag is polled even with no inbound traffic, and hand each
/// accepted socket to a per-connection closure.
pub(crate) struct AcceptLoop {
    pub options: ListeningOptions,
    pub pool: Arc<ConnectionPool>,
    pub dispatch: DispatchWrapper,
    pub handler: Arc<dyn RequestHandler>,
    pub stopping: Arc<AtomicBool>,
    /// Abort handles for every currently running per-connection task,
    /// keyed by an opaque sequence number. Used by
    /// [`ProtocolServer::force_close_connections`] to hard-kill anything
    /// still alive once the graceful shutdown deadline is reached.
    pub tasks: DashMap<u64, tokio::task::AbortHandle>,
    next_task_id: AtomicU64,
}

impl AcceptLoop {
    /// Build a new accept loop for `options`, with an empty task registry.
    pub fn new(
        options: ListeningOptions,
        pool: Arc<ConnectionPool>,
        dispatch: DispatchWrapper,
        handler: Arc<dyn RequestHandler>,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        Self {
            options,
            pool,
            dispatch,
            handler,
            stopping,
            tasks: DashMap::new(),
            next_task_id: AtomicU64::new(0),
        }
    }

    /// Abort every still-registered connection task. Used by the
    /// `protocol_force_shutdown` step; harmless to call more than once.
    pub fn abort_all(&self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
    }

    pub async fn bind(&self) -> Result<TcpListener, SupervisorError> {
        let addr = format!("{}:{}", self.options.host, self.options.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|source| SupervisorError::Bind {
                protocol: format!("{:?}", self.options.protocol),
                addr,
                source,
            })
    }

    /// Accept connections until `stopping` is set, polling it every 500ms
    /// of accept inactivity. `on_accept` is spawned per connection and
    /// owns the full lifetime of that connection, including pool admission
    /// and release.
    pub async fn run<F, Fut>(self: Arc<Self>, listener: TcpListener, on_accept: F)
    where
        F: Fn(tokio::net::TcpStream, SocketAddr, Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let on_accept = Arc::new(on_accept);
        loop {
            if self.stopping.load(Ordering::Acquire) {
                info!(protocol = ?self.options.protocol, "listener stopped accepting");
                break;
            }
            match tokio::time::timeout(Duration::from_millis(500), listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    let loop_ref = self.clone();
                    let cleanup_ref = self.clone();
                    let cb = on_accept.clone();
                    let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
                    let handle = tokio::spawn(async move {
                        cb(stream, peer, loop_ref).await;
                        cleanup_ref.tasks.remove(&task_id);
                    });
                    self.tasks.insert(task_id, handle.abort_handle());
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "accept failed");
                }
                Err(_) => {
                    // accept timeout elapsed; loop back to re-check `stopping`.
                }
            }
        }
    }
}
