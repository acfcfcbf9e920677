//! Crate-wide error taxonomy.
//!
//! Every fallible operation in `polyserve_core` returns one of the typed
//! errors below rather than a boxed or string error. The supervisor/daemon
//! boundary is the only place that collapses these into `anyhow::Error`.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by [`crate::pool::ConnectionPool`] operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool is at `max_connections` capacity and the entry was rejected.
    #[error("pool at capacity ({current}/{max})")]
    AtCapacity {
        /// Current admitted count at the time of rejection.
        current: usize,
        /// Configured capacity.
        max: usize,
    },

    /// The pool has begun or finished `closeAll` and no longer admits.
    #[error("pool is closed")]
    Closed,

    /// An operation referenced a connection id the pool has no record of.
    #[error("unknown connection id: {0}")]
    UnknownConnection(String),

    /// The pool's single-writer actor task is gone (panicked or dropped).
    #[error("pool actor unavailable")]
    ActorUnavailable,

    /// `tryAdmit` was called with a handle already tracked by the pool.
    #[error("connection id already admitted: {0}")]
    Duplicate(String),

    /// `tryAdmit`'s validation hook rejected the handle.
    #[error("connection id failed admission validation: {0}")]
    Invalid(String),
}

/// Errors raised during [`crate::shutdown::ShutdownOrchestrator::perform`].
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// A required step exhausted its retries without succeeding.
    #[error("required step '{step}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        /// Name of the step that failed.
        step: String,
        /// Number of attempts made.
        attempts: u32,
        /// Underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The global shutdown deadline elapsed before all required steps ran.
    #[error("shutdown exceeded global deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// A step's own per-attempt timeout elapsed on every attempt.
    #[error("step '{0}' timed out on every attempt")]
    StepTimedOut(String),
}

/// Errors raised by [`crate::dispatch::DispatchWrapper`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The handler did not finish before the configured per-request timeout.
    #[error("request {request_id} timed out after {elapsed:?}")]
    Timeout {
        /// The request id the timeout applies to.
        request_id: String,
        /// How long the handler had run before being cancelled.
        elapsed: Duration,
    },

    /// The wrapped handler returned an error.
    #[error("handler error: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors raised by [`crate::supervisor::Supervisor`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A protocol server failed to bind its listening address.
    #[error("failed to bind {protocol} on {addr}: {source}")]
    Bind {
        /// Protocol name (`http`, `grpc`, `ws`, ...).
        protocol: String,
        /// Address that failed to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `start()` was called on a supervisor that is already running.
    #[error("supervisor already started")]
    AlreadyStarted,

    /// An operation that requires a running supervisor was called while stopped.
    #[error("supervisor is not running")]
    NotRunning,

    /// Shutdown of one or more protocol servers failed.
    #[error("shutdown failed: {0}")]
    Shutdown(#[from] ShutdownError),
}
