//! Lock-free pool metrics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Snapshot of pool metrics at a point in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolMetricsSnapshot {
    /// Currently admitted connection count.
    pub current_connections: usize,
    /// High-water mark of admitted connections since the pool started.
    pub peak_connections: usize,
    /// Total admissions over the pool's lifetime.
    pub total_admitted: u64,
    /// Total releases over the pool's lifetime.
    pub total_released: u64,
    /// Total admissions rejected due to capacity.
    pub total_rejected: u64,
    /// Total entries removed by `sweepStale`.
    pub total_swept: u64,
    /// Total transport-level errors recorded against pooled connections.
    pub total_errors: u64,
}

/// Atomic counters/gauges backing [`PoolMetricsSnapshot`]. Cheap to update
/// from the single-writer actor and cheap to read concurrently from any
/// number of readers without locking.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    current_connections: AtomicUsize,
    peak_connections: AtomicUsize,
    total_admitted: AtomicU64,
    total_released: AtomicU64,
    total_rejected: AtomicU64,
    total_swept: AtomicU64,
    total_errors: AtomicU64,
}

impl PoolMetrics {
    /// Create a zeroed metrics set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful admission, bumping `current`/`peak`/`total_admitted`.
    pub fn record_admission(&self) {
        let current = self.current_connections.fetch_add(1, Ordering::Relaxed) + 1;
        self.total_admitted.fetch_add(1, Ordering::Relaxed);
        let mut peak = self.peak_connections.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_connections.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => peak = observed,
            }
        }
    }

    /// Record a release, decrementing `current` and bumping `total_released`.
    pub fn record_release(&self) {
        self.current_connections.fetch_sub(1, Ordering::Relaxed);
        self.total_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected admission attempt.
    pub fn record_rejection(&self) {
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sweep removal; also decrements `current` like a release.
    pub fn record_sweep(&self) {
        self.current_connections.fetch_sub(1, Ordering::Relaxed);
        self.total_swept.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transport-level error on a pooled connection. Does not by
    /// itself remove the connection; callers release separately.
    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot for reporting. Individual counters
    /// are read independently (no global lock), matching the relaxed
    /// consistency the pool's metrics contract allows.
    #[must_use]
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            current_connections: self.current_connections.load(Ordering::Relaxed),
            peak_connections: self.peak_connections.load(Ordering::Relaxed),
            total_admitted: self.total_admitted.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_swept: self.total_swept.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
        }
    }
}
