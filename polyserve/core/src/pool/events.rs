//! Pool event stream.
//!
//! A strongly-typed subscription registry rather than an untyped emitter:
//! subscribers register a closure accepting [`PoolEvent`] directly, so
//! there is no stringly-typed event-name dispatch to get wrong. Every
//! variant carries the metrics snapshot taken at the moment it fired, so a
//! subscriber never has to make a separate call back into the pool to
//! correlate an event with the counters it moved.

use std::sync::Arc;

use parking_lot::RwLock;

use super::metrics::PoolMetricsSnapshot;

/// An observable occurrence in a connection pool's lifecycle.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A connection was admitted.
    Added {
        /// Id of the admitted connection.
        connection_id: String,
        /// Metrics snapshot taken immediately after admission.
        metrics: PoolMetricsSnapshot,
    },
    /// A connection transitioned state.
    StateChanged {
        /// Id of the connection.
        connection_id: String,
        /// State it left.
        from: &'static str,
        /// State it entered.
        to: &'static str,
        /// Metrics snapshot taken immediately after the transition.
        metrics: PoolMetricsSnapshot,
    },
    /// A connection was removed from the pool, for any reason (explicit
    /// release, staleness sweep, keep-alive expiry, or a `closeAll` pass).
    Removed {
        /// Id of the removed connection.
        connection_id: String,
        /// Why it was removed (`"client_closed"`, `"stale_connection"`,
        /// `"keep_alive_timeout"`, `"pool_closed"`).
        reason: &'static str,
        /// Metrics snapshot taken immediately after removal.
        metrics: PoolMetricsSnapshot,
    },
    /// `tryAdmit` was rejected because the pool is at capacity.
    LimitReached {
        /// Metrics snapshot at the moment of rejection.
        metrics: PoolMetricsSnapshot,
    },
    /// A connection's keep-alive timer fired with no activity since arming.
    /// Always immediately followed by a `Removed { reason: "keep_alive_timeout" }`.
    Timeout {
        /// Id of the connection whose timer expired.
        connection_id: String,
        /// Metrics snapshot at the moment of expiry.
        metrics: PoolMetricsSnapshot,
    },
    /// A transport-level error was recorded against a connection.
    Error {
        /// Id of the connection the error was recorded against.
        connection_id: String,
        /// Metrics snapshot immediately after recording the error.
        metrics: PoolMetricsSnapshot,
    },
    /// `closeAll` began draining the pool.
    ClosingAll {
        /// Metrics snapshot at the moment draining began.
        metrics: PoolMetricsSnapshot,
    },
    /// `closeAll` finished; the pool holds no more connections.
    ClosedAll {
        /// Metrics snapshot at the moment draining finished.
        metrics: PoolMetricsSnapshot,
    },
}

type Subscriber = Arc<dyn Fn(&PoolEvent) + Send + Sync>;

/// Fan-out registry for [`PoolEvent`] subscribers.
#[derive(Default)]
pub struct PoolEventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl PoolEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber, returning nothing — subscriptions in this
    /// model live as long as the bus itself (no individual unsubscribe
    /// handle), matching the pool's "subscribe for the pool's lifetime"
    /// contract.
    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&PoolEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Arc::new(f));
    }

    /// Publish an event to all current subscribers. Subscribers are copied
    /// out of the lock before being invoked so a subscriber that itself
    /// calls `subscribe` cannot deadlock or observe a torn list.
    pub fn publish(&self, event: PoolEvent) {
        let subs: Vec<Subscriber> = self.subscribers.read().clone();
        for sub in subs {
            sub(&event);
        }
    }

    /// Number of currently registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fans_out_to_all_subscribers() {
        let bus = PoolEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.publish(PoolEvent::ClosingAll {
            metrics: PoolMetricsSnapshot::default(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn subscriber_count_reflects_registrations() {
        let bus = PoolEventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.subscribe(|_| {});
        bus.subscribe(|_| {});
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn removed_event_carries_reason_and_metrics() {
        let bus = PoolEventBus::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        bus.subscribe(move |event| {
            if let PoolEvent::Removed { reason, .. } = event {
                *seen_clone.lock().unwrap() = Some(*reason);
            }
        });
        bus.publish(PoolEvent::Removed {
            connection_id: "c1".into(),
            reason: "keep_alive_timeout",
            metrics: PoolMetricsSnapshot::default(),
        });
        assert_eq!(*seen.lock().unwrap(), Some("keep_alive_timeout"));
    }
}
