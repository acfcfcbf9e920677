//! Connection entry state machine.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Lifecycle state of a pooled connection.
///
/// Transitions: `Admitted -> Active`, `Active <-> Idle`, `Active|Idle ->
/// Releasing`, `Releasing -> Gone`. `Gone` is terminal; no transition leaves
/// it (invariant I1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted by the pool but not yet marked active by the caller.
    Admitted,
    /// Actively serving at least one in-flight request.
    Active,
    /// Open but with no in-flight work; eligible for sweep once stale.
    Idle,
    /// Draining: no new work accepted, in-flight work finishing.
    Releasing,
    /// Fully removed from the pool. Terminal.
    Gone,
}

impl ConnectionState {
    /// Whether a transition from `self` to `next` is legal.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::{Active, Admitted, Gone, Idle, Releasing};
        matches!(
            (self, next),
            (Admitted, Active)
                | (Admitted, Releasing)
                | (Active, Idle)
                | (Idle, Active)
                | (Active, Releasing)
                | (Idle, Releasing)
                | (Releasing, Gone)
        )
    }
}

/// A single tracked connection. Unique by `id` for the lifetime of the pool
/// (invariant I4: ids are never reused while the pool is open).
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    /// Unique connection id, assigned at admission.
    pub id: String,
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Instant the connection was admitted.
    pub connected_at: Instant,
    /// Instant of the most recent `touch` (invariant I2: never precedes
    /// `connected_at`).
    pub last_active_at: Instant,
    /// Opaque protocol tag (`"http"`, `"grpc"`, `"ws"`, ...) for metrics grouping.
    pub protocol: &'static str,
    /// Remote peer address/identity, when the caller supplied one at admission.
    pub remote_peer: Option<String>,
    /// Requests served on this connection. Monotonically non-decreasing
    /// (invariant I3).
    pub request_count: u64,
    /// Free-form protocol-specific attributes, merged in by `touch`.
    pub protocol_attributes: HashMap<String, String>,
}

impl ConnectionEntry {
    /// Create a newly admitted entry.
    #[must_use]
    pub fn new(id: String, protocol: &'static str, remote_peer: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: ConnectionState::Admitted,
            connected_at: now,
            last_active_at: now,
            protocol,
            remote_peer,
            request_count: 0,
            protocol_attributes: HashMap::new(),
        }
    }

    /// Attempt a state transition, returning `false` if illegal.
    #[must_use]
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    /// Record activity: refresh `last_active_at`, advance `request_count`,
    /// and merge in any supplied attribute updates.
    pub fn touch(&mut self, attr_updates: Option<&HashMap<String, String>>) {
        self.last_active_at = Instant::now();
        self.request_count += 1;
        if let Some(updates) = attr_updates {
            for (k, v) in updates {
                self.protocol_attributes.insert(k.clone(), v.clone());
            }
        }
    }

    /// Whether this entry has gone `idle_timeout` or longer without activity,
    /// regardless of its current lifecycle state. Backs both `isHealthy`
    /// and `sweepStale`.
    #[must_use]
    pub fn is_stale(&self, idle_timeout: Duration) -> bool {
        self.last_active_at.elapsed() >= idle_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        let mut e = ConnectionEntry::new("c1".into(), "http", None);
        assert_eq!(e.state, ConnectionState::Admitted);
        assert!(e.transition(ConnectionState::Active));
        assert!(e.transition(ConnectionState::Idle));
        assert!(e.transition(ConnectionState::Active));
        assert!(e.transition(ConnectionState::Releasing));
        assert!(e.transition(ConnectionState::Gone));
    }

    #[test]
    fn gone_is_terminal() {
        let mut e = ConnectionEntry::new("c1".into(), "http", None);
        e.transition(ConnectionState::Active);
        e.transition(ConnectionState::Releasing);
        e.transition(ConnectionState::Gone);
        assert!(!e.transition(ConnectionState::Active));
        assert!(!e.transition(ConnectionState::Idle));
        assert_eq!(e.state, ConnectionState::Gone);
    }

    #[test]
    fn cannot_skip_to_active_without_admission_path() {
        let mut e = ConnectionEntry::new("c1".into(), "http", None);
        e.transition(ConnectionState::Active);
        e.transition(ConnectionState::Idle);
        assert!(!e.transition(ConnectionState::Admitted));
    }

    #[test]
    fn becomes_stale_after_timeout_regardless_of_state() {
        let mut e = ConnectionEntry::new("c1".into(), "http", None);
        e.transition(ConnectionState::Active);
        assert!(!e.is_stale(Duration::from_secs(60)));
        assert!(e.is_stale(Duration::from_secs(0)));
    }

    #[test]
    fn touch_refreshes_activity_and_advances_request_count() {
        let mut e = ConnectionEntry::new("c1".into(), "http", None);
        assert_eq!(e.request_count, 0);
        e.touch(None);
        assert_eq!(e.request_count, 1);
        assert!(!e.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn touch_merges_protocol_attributes() {
        let mut e = ConnectionEntry::new("c1".into(), "http", None);
        let mut updates = HashMap::new();
        updates.insert("http_version".to_string(), "1.1".to_string());
        e.touch(Some(&updates));
        assert_eq!(
            e.protocol_attributes.get("http_version").map(String::as_str),
            Some("1.1")
        );

        let mut more = HashMap::new();
        more.insert("http_version".to_string(), "2".to_string());
        e.touch(Some(&more));
        assert_eq!(
            e.protocol_attributes.get("http_version").map(String::as_str),
            Some("2")
        );
    }

    #[test]
    fn remote_peer_is_recorded_at_admission() {
        let e = ConnectionEntry::new("c1".into(), "http", Some("127.0.0.1:9".into()));
        assert_eq!(e.remote_peer.as_deref(), Some("127.0.0.1:9"));
    }
}
