//! Protocol-agnostic connection pool.
//!
//! [`ConnectionPool`] tracks connection lifecycle, health, and metrics
//! without knowing anything about the transport carrying them. Concrete
//! protocol servers implement [`PoolAdapter`] to bind their own connection
//! handle type to a shared pool.

pub mod entry;
pub mod events;
pub mod metrics;
pub mod pool;
pub mod timer;

pub use entry::{ConnectionEntry, ConnectionState};
pub use events::{PoolEvent, PoolEventBus};
pub use metrics::{PoolMetrics, PoolMetricsSnapshot};
pub use pool::ConnectionPool;

/// Binds a concrete per-protocol connection handle type to a shared
/// [`ConnectionPool`]. Protocol servers (`crate::protocol::*`) implement
/// this so each owns its native handle (a `TcpStream`, a `tonic` request
/// stream, ...) while delegating admission bookkeeping to the pool.
#[async_trait::async_trait]
pub trait PoolAdapter: Send + Sync {
    /// The native connection handle this adapter wraps.
    type Handle: Send;

    /// Protocol tag used for pool metrics/event grouping.
    fn protocol(&self) -> &'static str;

    /// Admit `handle` under `connection_id`, delegating the bookkeeping
    /// decision to the shared pool.
    async fn admit(
        &self,
        pool: &ConnectionPool,
        connection_id: String,
    ) -> Result<(), crate::error::PoolError> {
        pool.try_admit(connection_id, self.protocol(), None).await
    }
}
