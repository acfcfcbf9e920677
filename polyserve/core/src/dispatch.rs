//! Request tracing and dispatch wrapper.
//!
//! Wraps an application handler invocation with request-id propagation, a
//! per-request timeout, and a drain gate that short-circuits new work once
//! the supervisor has begun shutting down.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info_span, Instrument};

use crate::error::DispatchError;
use crate::trace::TraceContext;

/// Shared flag flipped once the owning supervisor starts draining. Cheap to
/// clone and check from every in-flight dispatch without locking.
#[derive(Clone, Default)]
pub struct DrainGate {
    draining: Arc<AtomicBool>,
}

impl DrainGate {
    /// Create a gate that is initially open (not draining).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the gate is currently draining.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Begin draining. Irreversible for the lifetime of this gate.
    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::Release);
    }
}

/// Wraps handler invocations with tracing, timeout, and drain-gate checks.
#[derive(Clone)]
pub struct DispatchWrapper {
    gate: DrainGate,
    request_timeout: Duration,
}

impl DispatchWrapper {
    /// Build a wrapper bound to `gate`, enforcing `request_timeout` per call.
    #[must_use]
    pub fn new(gate: DrainGate, request_timeout: Duration) -> Self {
        Self {
            gate,
            request_timeout,
        }
    }

    /// Dispatch `next` under `ctx`, racing it against the configured
    /// timeout and recording a tracing span correlated by `ctx.request_id`.
    ///
    /// If the gate is draining, `ctx` (and every clone sharing its
    /// `terminated` flag) is marked terminated, but `next` still runs —
    /// the caller's protocol dispatcher is expected to check
    /// `ctx.is_terminated()` once this returns and substitute its own
    /// shutting-down response rather than the handler's, per the drain-gate
    /// contract.
    pub async fn wrap<F, Fut, T, E>(&self, ctx: TraceContext, next: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if self.gate.is_draining() {
            ctx.mark_terminated();
        }

        let span = info_span!(
            "request",
            request_id = %ctx.request_id,
            protocol = ctx.protocol,
            connection_id = ctx.connection_id.as_deref().unwrap_or("")
        );

        let start = std::time::Instant::now();
        let fut = next().instrument(span);

        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(DispatchError::Handler(Box::new(err))),
            Err(_) => Err(DispatchError::Timeout {
                request_id: ctx.request_id,
                elapsed: start.elapsed(),
            }),
        }
    }

    /// Whether the drain gate is currently closed to new work.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.gate.is_draining()
    }

    /// Access the underlying gate, e.g. so a supervisor can flip it.
    #[must_use]
    pub fn gate(&self) -> &DrainGate {
        &self.gate
    }

    /// The per-request timeout enforced by `wrap`, for attaching to a
    /// [`TraceContext`] before dispatch (see [`TraceContext::with_timeout`]).
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}
