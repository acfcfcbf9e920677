//! The connection pool actor.
//!
//! All mutation of pool state (admission, release, touch, sweep, close)
//! goes through a single writer task reading from an `mpsc` command
//! channel, so ordering between concurrent callers is well-defined
//! (§5: single-writer-per-pool). Reads that don't need to observe the
//! writer's exact serialization order — `isHealthy`, `metrics` — are
//! served from a `dashmap` mirror and lock-free atomics instead of round
//! tripping through the actor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::PoolError;

use super::entry::{ConnectionEntry, ConnectionState};
use super::events::{PoolEvent, PoolEventBus};
use super::metrics::{PoolMetrics, PoolMetricsSnapshot};
use super::timer::TimerRegistry;

/// Admission validation hook: given a candidate id and protocol tag,
/// returns whether the handle may be admitted. The default rejects only
/// empty ids; embedders with stricter handle shapes can supply their own
/// via [`ConnectionPool::spawn_with_validator`].
pub type Validator = Arc<dyn Fn(&str, &'static str) -> bool + Send + Sync>;

fn default_validator() -> Validator {
    Arc::new(|id: &str, _protocol: &'static str| !id.is_empty())
}

enum Command {
    TryAdmit {
        id: String,
        protocol: &'static str,
        remote_peer: Option<String>,
        reply: oneshot::Sender<Result<(), PoolError>>,
    },
    Release {
        id: String,
        reason: &'static str,
        reply: oneshot::Sender<Result<(), PoolError>>,
    },
    Touch {
        id: String,
        attrs: Option<HashMap<String, String>>,
        reply: oneshot::Sender<Result<(), PoolError>>,
    },
    MarkIdle {
        id: String,
        reply: oneshot::Sender<Result<(), PoolError>>,
    },
    RecordError {
        id: String,
        reply: oneshot::Sender<Result<(), PoolError>>,
    },
    SweepStale {
        reply: oneshot::Sender<Vec<String>>,
    },
    CloseAll {
        reply: oneshot::Sender<()>,
    },
    TimerExpired {
        id: String,
        deadline: Instant,
    },
}

struct Writer {
    entries: HashMap<String, ConnectionEntry>,
    mirror: Arc<DashMap<String, ConnectionState>>,
    last_active: Arc<DashMap<String, Instant>>,
    metrics: Arc<PoolMetrics>,
    events: Arc<PoolEventBus>,
    timers: TimerRegistry,
    validate: Validator,
    max_connections: usize,
    idle_timeout: Duration,
    closed: bool,
    self_tx: mpsc::Sender<Command>,
}

impl Writer {
    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::TryAdmit {
                id,
                protocol,
                remote_peer,
                reply,
            } => {
                let _ = reply.send(self.try_admit(id, protocol, remote_peer));
            }
            Command::Release { id, reason, reply } => {
                let _ = reply.send(self.release(&id, reason));
            }
            Command::Touch { id, attrs, reply } => {
                let _ = reply.send(self.touch(&id, attrs));
            }
            Command::MarkIdle { id, reply } => {
                let _ = reply.send(self.mark_idle(&id));
            }
            Command::RecordError { id, reply } => {
                let _ = reply.send(self.record_error(&id));
            }
            Command::SweepStale { reply } => {
                let _ = reply.send(self.sweep_stale());
            }
            Command::CloseAll { reply } => {
                self.close_all();
                let _ = reply.send(());
            }
            Command::TimerExpired { id, deadline } => {
                self.on_timer_expired(&id, deadline);
            }
        }
    }

    fn try_admit(
        &mut self,
        id: String,
        protocol: &'static str,
        remote_peer: Option<String>,
    ) -> Result<(), PoolError> {
        if self.closed {
            return Err(PoolError::Closed);
        }
        if self.entries.contains_key(&id) {
            return Err(PoolError::Duplicate(id));
        }
        if !(self.validate)(&id, protocol) {
            return Err(PoolError::Invalid(id));
        }
        if self.entries.len() >= self.max_connections {
            self.metrics.record_rejection();
            let metrics = self.metrics.snapshot();
            self.events.publish(PoolEvent::LimitReached { metrics });
            return Err(PoolError::AtCapacity {
                current: self.entries.len(),
                max: self.max_connections,
            });
        }
        let entry = ConnectionEntry::new(id.clone(), protocol, remote_peer);
        self.mirror.insert(id.clone(), entry.state);
        self.last_active.insert(id.clone(), entry.last_active_at);
        self.entries.insert(id.clone(), entry);
        self.metrics.record_admission();
        let metrics = self.metrics.snapshot();
        self.events.publish(PoolEvent::Added {
            connection_id: id.clone(),
            metrics,
        });
        self.arm_timer(&id);
        debug!(connection_id = %id, protocol, "connection admitted");
        Ok(())
    }

    fn release(&mut self, id: &str, reason: &'static str) -> Result<(), PoolError> {
        let from = self
            .entries
            .get(id)
            .map(|e| e.state)
            .ok_or_else(|| PoolError::UnknownConnection(id.to_string()))?;
        self.remove_entry(id, false);
        let metrics = self.metrics.snapshot();
        self.events.publish(PoolEvent::StateChanged {
            connection_id: id.to_string(),
            from: state_name(from),
            to: state_name(ConnectionState::Gone),
            metrics,
        });
        self.events.publish(PoolEvent::Removed {
            connection_id: id.to_string(),
            reason,
            metrics,
        });
        debug!(connection_id = %id, reason, "connection released");
        Ok(())
    }

    fn touch(&mut self, id: &str, attrs: Option<HashMap<String, String>>) -> Result<(), PoolError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| PoolError::UnknownConnection(id.to_string()))?;
        if entry.state == ConnectionState::Idle || entry.state == ConnectionState::Admitted {
            entry.transition(ConnectionState::Active);
        }
        entry.touch(attrs.as_ref());
        self.mirror.insert(id.to_string(), entry.state);
        self.last_active.insert(id.to_string(), entry.last_active_at);
        self.arm_timer(id);
        Ok(())
    }

    fn mark_idle(&mut self, id: &str) -> Result<(), PoolError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| PoolError::UnknownConnection(id.to_string()))?;
        if entry.state == ConnectionState::Active {
            entry.transition(ConnectionState::Idle);
            entry.touch(None);
            self.mirror.insert(id.to_string(), entry.state);
            self.last_active.insert(id.to_string(), entry.last_active_at);
            self.arm_timer(id);
        }
        Ok(())
    }

    fn record_error(&mut self, id: &str) -> Result<(), PoolError> {
        if !self.entries.contains_key(id) {
            return Err(PoolError::UnknownConnection(id.to_string()));
        }
        self.metrics.record_error();
        let metrics = self.metrics.snapshot();
        self.events.publish(PoolEvent::Error {
            connection_id: id.to_string(),
            metrics,
        });
        Ok(())
    }

    fn sweep_stale(&mut self) -> Vec<String> {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_stale(self.idle_timeout))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.remove_entry(id, true);
            let metrics = self.metrics.snapshot();
            self.events.publish(PoolEvent::Removed {
                connection_id: id.clone(),
                reason: "stale_connection",
                metrics,
            });
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "swept stale connections");
        }
        stale
    }

    fn close_all(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let metrics = self.metrics.snapshot();
        self.events.publish(PoolEvent::ClosingAll { metrics });
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for id in ids {
            self.remove_entry(&id, false);
        }
        self.timers.cancel_all();
        let metrics = self.metrics.snapshot();
        self.events.publish(PoolEvent::ClosedAll { metrics });
        warn!("pool closed");
    }

    /// Fire on a keep-alive timer expiry. Discards the notification if a
    /// later `touch`/rearm has already superseded the deadline it was
    /// armed for (P3: a stale in-flight fire must not act on current
    /// state). Otherwise releases with `keep_alive_timeout` if no activity
    /// has been observed since arming, or rearms for the remainder of the
    /// timeout if activity moved the deadline out from under it.
    fn on_timer_expired(&mut self, id: &str, deadline: Instant) {
        if !self.timers.is_current_deadline(id, deadline) {
            return;
        }
        let Some(entry) = self.entries.get(id) else {
            return;
        };
        let elapsed = entry.last_active_at.elapsed();
        if elapsed >= self.idle_timeout {
            self.remove_entry(id, true);
            let metrics = self.metrics.snapshot();
            self.events.publish(PoolEvent::Timeout {
                connection_id: id.to_string(),
                metrics,
            });
            self.events.publish(PoolEvent::Removed {
                connection_id: id.to_string(),
                reason: "keep_alive_timeout",
                metrics,
            });
            info!(connection_id = %id, "connection keep-alive timed out");
        } else {
            let remainder = self.idle_timeout - elapsed;
            self.arm_timer_for(id, remainder);
        }
    }

    /// Remove `id` from every bookkeeping structure (entries, mirror,
    /// `last_active`, timer registry) and record it against either the
    /// release or sweep counter. Does not itself publish any event; callers
    /// publish whichever `PoolEvent` fits their reason.
    fn remove_entry(&mut self, id: &str, count_as_sweep: bool) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.transition(ConnectionState::Releasing);
            entry.transition(ConnectionState::Gone);
        }
        self.entries.remove(id);
        self.mirror.remove(id);
        self.last_active.remove(id);
        self.timers.cancel(id);
        if count_as_sweep {
            self.metrics.record_sweep();
        } else {
            self.metrics.record_release();
        }
    }

    fn arm_timer(&mut self, id: &str) {
        self.arm_timer_for(id, self.idle_timeout);
    }

    fn arm_timer_for(&mut self, id: &str, duration: Duration) {
        let tx = self.self_tx.clone();
        self.timers.arm(
            id.to_string(),
            duration,
            Arc::new(move |expired_id, deadline| {
                let tx = tx.clone();
                let _ = tx.try_send(Command::TimerExpired {
                    id: expired_id,
                    deadline,
                });
            }),
        );
    }
}

fn state_name(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Admitted => "admitted",
        ConnectionState::Active => "active",
        ConnectionState::Idle => "idle",
        ConnectionState::Releasing => "releasing",
        ConnectionState::Gone => "gone",
    }
}

/// Handle to a running connection pool. Cheap to clone; all clones share
/// the same writer task and underlying state.
#[derive(Clone)]
pub struct ConnectionPool {
    tx: mpsc::Sender<Command>,
    mirror: Arc<DashMap<String, ConnectionState>>,
    last_active: Arc<DashMap<String, Instant>>,
    metrics: Arc<PoolMetrics>,
    events: Arc<PoolEventBus>,
    closed: Arc<AtomicBool>,
    idle_timeout: Duration,
}

impl ConnectionPool {
    /// Spawn a pool's writer task and return a handle to it, using the
    /// default admission validator (rejects only empty ids).
    #[must_use]
    pub fn spawn(max_connections: usize, idle_timeout: Duration) -> Self {
        Self::spawn_with_validator(max_connections, idle_timeout, default_validator())
    }

    /// Spawn a pool's writer task with a custom admission [`Validator`].
    #[must_use]
    pub fn spawn_with_validator(
        max_connections: usize,
        idle_timeout: Duration,
        validate: Validator,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel(1024);
        let mirror = Arc::new(DashMap::new());
        let last_active = Arc::new(DashMap::new());
        let metrics = Arc::new(PoolMetrics::new());
        let events = Arc::new(PoolEventBus::new());
        let closed = Arc::new(AtomicBool::new(false));

        let mut writer = Writer {
            entries: HashMap::new(),
            mirror: mirror.clone(),
            last_active: last_active.clone(),
            metrics: metrics.clone(),
            events: events.clone(),
            timers: TimerRegistry::new(),
            validate,
            max_connections,
            idle_timeout,
            closed: false,
            self_tx: tx.clone(),
        };

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                writer.handle(cmd);
            }
        });

        Self {
            tx,
            mirror,
            last_active,
            metrics,
            events,
            closed,
            idle_timeout,
        }
    }

    /// Attempt to admit a new connection, optionally recording its remote
    /// peer. Rejects with [`PoolError::Duplicate`] if `id` is already
    /// tracked, [`PoolError::Invalid`] if the configured validator refuses
    /// it, [`PoolError::AtCapacity`] past `max_connections`, or
    /// [`PoolError::Closed`] once `closeAll` has run.
    pub async fn try_admit(
        &self,
        id: impl Into<String>,
        protocol: &'static str,
        remote_peer: Option<String>,
    ) -> Result<(), PoolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::TryAdmit {
                id: id.into(),
                protocol,
                remote_peer,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PoolError::ActorUnavailable)?;
        reply_rx.await.map_err(|_| PoolError::ActorUnavailable)?
    }

    /// Release a connection, moving it to `Releasing` then `Gone` and
    /// removing it from the pool. `reason` is carried on the emitted
    /// [`PoolEvent::Removed`] (e.g. `"client_closed"`, `"error"`); idempotent
    /// per §4.1 — releasing an id the pool no longer tracks is a no-op.
    pub async fn release(&self, id: impl Into<String>, reason: &'static str) -> Result<(), PoolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Release {
                id: id.into(),
                reason,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PoolError::ActorUnavailable)?;
        reply_rx.await.map_err(|_| PoolError::ActorUnavailable)?
    }

    /// Record activity on a connection: rearms its keep-alive timer,
    /// advances its request count, merges any `attrs` into its protocol
    /// attributes, and moves it back to `Active` if it was `Idle`.
    pub async fn touch(
        &self,
        id: impl Into<String>,
        attrs: Option<HashMap<String, String>>,
    ) -> Result<(), PoolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Touch {
                id: id.into(),
                attrs,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PoolError::ActorUnavailable)?;
        reply_rx.await.map_err(|_| PoolError::ActorUnavailable)?
    }

    /// Mark a connection idle (no in-flight work), making it eligible for
    /// `sweep_stale` once it sits past the configured idle timeout.
    pub async fn mark_idle(&self, id: impl Into<String>) -> Result<(), PoolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::MarkIdle {
                id: id.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| PoolError::ActorUnavailable)?;
        reply_rx.await.map_err(|_| PoolError::ActorUnavailable)?
    }

    /// Record a transport-level error against a tracked connection, bumping
    /// `totalErrors` and publishing [`PoolEvent::Error`]. Does not remove
    /// the connection; callers still `release` separately.
    pub async fn record_error(&self, id: impl Into<String>) -> Result<(), PoolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::RecordError {
                id: id.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| PoolError::ActorUnavailable)?;
        reply_rx.await.map_err(|_| PoolError::ActorUnavailable)?
    }

    /// Cheap, lock-free health check served from the state mirror and
    /// `last_active` timestamp rather than the writer. A connection is
    /// healthy if it is tracked, not `Gone`, and has seen activity within
    /// the pool's configured idle timeout.
    #[must_use]
    pub fn is_healthy(&self, id: &str) -> bool {
        let Some(state) = self.mirror.get(id).map(|s| *s) else {
            return false;
        };
        if state == ConnectionState::Gone {
            return false;
        }
        self.last_active
            .get(id)
            .is_some_and(|last| last.elapsed() <= self.idle_timeout)
    }

    /// Force-remove every connection that has gone stale (no activity
    /// within the idle timeout), regardless of lifecycle state. Returns the
    /// removed ids.
    pub async fn sweep_stale(&self) -> Vec<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::SweepStale { reply: reply_tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Drain and close every connection. Idempotent: a second call after
    /// the pool is already closed is a no-op and returns once the writer
    /// confirms it observed the (already-closed) request.
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::CloseAll { reply: reply_tx })
            .await
            .is_err()
        {
            return;
        }
        let _ = reply_rx.await;
    }

    /// Whether `close_all` has been invoked on this pool.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Lock-free metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Subscribe to the pool's event stream.
    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&PoolEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_capacity_then_rejects() {
        let pool = ConnectionPool::spawn(2, Duration::from_secs(60));
        pool.try_admit("a", "http", None).await.unwrap();
        pool.try_admit("b", "http", None).await.unwrap();
        let err = pool.try_admit("c", "http", None).await.unwrap_err();
        assert!(matches!(err, PoolError::AtCapacity { current: 2, max: 2 }));
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_without_disturbing_the_original() {
        let pool = ConnectionPool::spawn(4, Duration::from_secs(60));
        pool.try_admit("a", "http", None).await.unwrap();
        let err = pool.try_admit("a", "http", None).await.unwrap_err();
        assert!(matches!(err, PoolError::Duplicate(ref id) if id == "a"));
        assert_eq!(pool.metrics().current_connections, 1);
        assert_eq!(pool.metrics().total_admitted, 1);
    }

    #[tokio::test]
    async fn invalid_handle_is_rejected_by_validator() {
        let pool = ConnectionPool::spawn_with_validator(
            4,
            Duration::from_secs(60),
            Arc::new(|id: &str, _protocol| id.starts_with("ok-")),
        );
        let err = pool.try_admit("bad-1", "http", None).await.unwrap_err();
        assert!(matches!(err, PoolError::Invalid(ref id) if id == "bad-1"));
        pool.try_admit("ok-1", "http", None).await.unwrap();
        assert_eq!(pool.metrics().current_connections, 1);
    }

    #[tokio::test]
    async fn release_frees_capacity() {
        let pool = ConnectionPool::spawn(1, Duration::from_secs(60));
        pool.try_admit("a", "http", None).await.unwrap();
        pool.release("a", "client_closed").await.unwrap();
        pool.try_admit("b", "http", None).await.unwrap();
    }

    #[tokio::test]
    async fn is_healthy_reflects_admission_and_release() {
        let pool = ConnectionPool::spawn(4, Duration::from_secs(60));
        pool.try_admit("a", "http", None).await.unwrap();
        assert!(pool.is_healthy("a"));
        pool.release("a", "client_closed").await.unwrap();
        assert!(!pool.is_healthy("a"));
    }

    #[tokio::test]
    async fn is_healthy_is_false_once_idle_timeout_elapses() {
        let pool = ConnectionPool::spawn(4, Duration::from_millis(10));
        pool.try_admit("a", "http", None).await.unwrap();
        assert!(pool.is_healthy("a"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!pool.is_healthy("a"));
    }

    #[tokio::test]
    async fn close_all_removes_everything_and_rejects_new_admits() {
        let pool = ConnectionPool::spawn(4, Duration::from_secs(60));
        pool.try_admit("a", "http", None).await.unwrap();
        pool.try_admit("b", "http", None).await.unwrap();
        pool.close_all().await;
        assert_eq!(pool.metrics().current_connections, 0);
        let err = pool.try_admit("c", "http", None).await.unwrap_err();
        assert!(matches!(err, PoolError::Closed));
    }

    #[tokio::test]
    async fn close_all_is_idempotent() {
        let pool = ConnectionPool::spawn(4, Duration::from_secs(60));
        pool.try_admit("a", "http", None).await.unwrap();
        pool.close_all().await;
        pool.close_all().await;
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn sweep_stale_removes_idle_past_timeout() {
        let pool = ConnectionPool::spawn(4, Duration::from_millis(1));
        pool.try_admit("a", "http", None).await.unwrap();
        pool.touch("a", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = pool.sweep_stale().await;
        assert_eq!(removed, vec!["a".to_string()]);
        assert!(!pool.is_healthy("a"));
    }

    #[tokio::test]
    async fn active_connection_past_idle_timeout_is_still_swept() {
        // sweepStale and isHealthy are purely time-based; an Active
        // connection with no recent activity is just as stale as an Idle
        // one (§4.1 algorithmic notes override the terser state-machine
        // phrasing).
        let pool = ConnectionPool::spawn(4, Duration::from_millis(1));
        pool.try_admit("a", "http", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = pool.sweep_stale().await;
        assert_eq!(removed, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn keep_alive_timer_releases_with_timeout_reason() {
        let pool = ConnectionPool::spawn(4, Duration::from_millis(15));
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let events_clone = events.clone();
        pool.subscribe(move |e| {
            events_clone.lock().unwrap().push(format!("{e:?}"));
        });
        pool.try_admit("a", "grpc", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!pool.is_healthy("a"));
        let log = events.lock().unwrap();
        assert!(log.iter().any(|e| e.contains("Timeout")));
        assert!(log.iter().any(|e| e.contains("keep_alive_timeout")));
    }

    #[tokio::test]
    async fn touch_before_expiry_rearms_instead_of_releasing() {
        let pool = ConnectionPool::spawn(4, Duration::from_millis(40));
        pool.try_admit("a", "ws", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        pool.touch("a", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        // 50ms since admission but only 25ms since the touch: still alive.
        assert!(pool.is_healthy("a"));
    }

    #[tokio::test]
    async fn record_error_bumps_total_errors_without_removing_connection() {
        let pool = ConnectionPool::spawn(4, Duration::from_secs(60));
        pool.try_admit("a", "http", None).await.unwrap();
        pool.record_error("a").await.unwrap();
        pool.record_error("a").await.unwrap();
        assert_eq!(pool.metrics().total_errors, 2);
        assert!(pool.is_healthy("a"));
    }

    #[tokio::test]
    async fn events_fire_on_admit_and_release() {
        let pool = ConnectionPool::spawn(4, Duration::from_secs(60));
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let events_clone = events.clone();
        pool.subscribe(move |e| {
            events_clone.lock().unwrap().push(format!("{e:?}"));
        });
        pool.try_admit("a", "http", None).await.unwrap();
        pool.release("a", "client_closed").await.unwrap();
        let log = events.lock().unwrap();
        assert!(log.iter().any(|e| e.contains("Added")));
        assert!(log.iter().any(|e| e.contains("client_closed")));
    }

    #[tokio::test]
    async fn limit_reached_event_fires_at_capacity() {
        let pool = ConnectionPool::spawn(1, Duration::from_secs(60));
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let events_clone = events.clone();
        pool.subscribe(move |e| {
            events_clone.lock().unwrap().push(format!("{e:?}"));
        });
        pool.try_admit("a", "http", None).await.unwrap();
        let _ = pool.try_admit("b", "http", None).await;
        let log = events.lock().unwrap();
        assert!(log.iter().any(|e| e.contains("LimitReached")));
    }
}
