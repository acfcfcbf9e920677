//! Keep-alive timer registry.
//!
//! One timer per connection, rearmed on every `touch` rather than reset by
//! cancel-and-respawn: a fresh deadline replaces the old one's
//! significance, but the existing spawned task is left to fire and no-op
//! if it turns out stale. Removal cancels the task outright so a `Gone`
//! connection can never trigger a spurious sweep callback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;

struct TimerState {
    handle: JoinHandle<()>,
    /// Deadline this timer's spawn was armed for. A fire whose deadline is
    /// older than the currently recorded deadline is stale and ignored.
    deadline: Instant,
}

/// Registry of per-connection keep-alive timers, posting expiry
/// notifications back to a callback (in practice, the pool's single-writer
/// command channel).
pub struct TimerRegistry {
    timers: DashMap<String, TimerState>,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timers: DashMap::new(),
        }
    }

    /// (Re)arm the timer for `connection_id` to fire
    /// `on_expire(connection_id, deadline)` after `idle_timeout`, replacing
    /// any previous timer for that id. The previous timer's task is
    /// `abort()`ed so at most one timer per connection is ever sleeping at
    /// once (P3) rather than left to fire and leak.
    pub fn arm<F>(&self, connection_id: String, idle_timeout: Duration, on_expire: Arc<F>)
    where
        F: Fn(String, Instant) + Send + Sync + 'static,
    {
        let deadline = Instant::now() + idle_timeout;
        let id_for_task = connection_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            on_expire(id_for_task, deadline);
        });
        if let Some(previous) = self
            .timers
            .insert(connection_id, TimerState { handle, deadline })
        {
            previous.handle.abort();
        }
    }

    /// Cancel and remove the timer for `connection_id`, if any.
    pub fn cancel(&self, connection_id: &str) {
        if let Some((_, state)) = self.timers.remove(connection_id) {
            state.handle.abort();
        }
    }

    /// Cancel every outstanding timer. Used by `closeAll`.
    pub fn cancel_all(&self) {
        for entry in self.timers.iter() {
            entry.value().handle.abort();
        }
        self.timers.clear();
    }

    /// Whether the timer currently recorded for `connection_id` is still
    /// the one armed at `deadline` (used by the writer to discard stale
    /// fire notifications after a rearm raced with an expiry).
    #[must_use]
    pub fn is_current_deadline(&self, connection_id: &str, deadline: Instant) -> bool {
        self.timers
            .get(connection_id)
            .is_some_and(|state| state.deadline == deadline)
    }

    /// Number of armed timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether the registry holds no timers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fires_after_timeout() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        registry.arm(
            "c1".to_string(),
            Duration::from_millis(10),
            Arc::new(move |_id, _deadline| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_prevents_fire() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        registry.arm(
            "c1".to_string(),
            Duration::from_millis(10),
            Arc::new(move |_id, _deadline| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registry.cancel("c1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rearm_replaces_previous_timer() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let cb = {
            let fired = fired.clone();
            Arc::new(move |_id: String, _deadline: Instant| {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        registry.arm("c1".to_string(), Duration::from_millis(10), cb.clone());
        registry.arm("c1".to_string(), Duration::from_secs(5), cb);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn rearm_aborts_previous_task_instead_of_leaking_it() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let cb = {
            let fired = fired.clone();
            Arc::new(move |_id: String, _deadline: Instant| {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        registry.arm("c1".to_string(), Duration::from_millis(10), cb.clone());
        // Rearm before the first timer fires; its task must be aborted, not
        // left sleeping to fire a stale notification later.
        registry.arm("c1".to_string(), Duration::from_millis(10), cb);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
