//! WebSocket client connection state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;
use triage_core::events::Event;
use triage_core::{ConnectionId, PrincipalId, Result, TriageError};

use super::lifecycle::ConnectionState;

/// One live transport session.
///
/// The principal is written at most once, while authenticating, and is
/// read-only afterwards.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    principal: OnceLock<PrincipalId>,
    state: Mutex<ConnectionState>,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat tick.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to a full or closed channel.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection in the `Connecting` state.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            principal: OnceLock::new(),
            state: Mutex::new(ConnectionState::Connecting),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Principal bound during authentication, if any.
    pub fn principal(&self) -> Option<&PrincipalId> {
        self.principal.get()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `to`, returning the previous state.
    pub fn transition(&self, to: ConnectionState) -> Result<ConnectionState> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition_to(to) {
            return Err(TriageError::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }
        *state = to;
        Ok(from)
    }

    /// Bind `principal` and move `Connecting -> Authenticated`.
    pub fn authenticate(&self, principal: PrincipalId) -> Result<()> {
        let mut state = self.state.lock();
        let from = *state;
        let to = ConnectionState::Authenticated;
        if !from.can_transition_to(to) || self.principal.set(principal).is_err() {
            return Err(TriageError::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }
        *state = to;
        Ok(())
    }

    /// Queue a text frame for the client.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Encode and queue a single event for this connection only.
    pub fn send_event(&self, event: &Event) -> bool {
        match event.to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(error) => {
                warn!(connection_id = %self.id, %error, "failed to encode event");
                false
            }
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last sign of life.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("principal", &self.principal())
            .field("state", &self.state())
            .field("dropped_messages", &self.drop_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        (ClientConnection::new(ConnectionId::from("conn_1"), tx), rx)
    }

    #[test]
    fn starts_connecting_without_principal() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id.as_str(), "conn_1");
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.principal().is_none());
    }

    #[test]
    fn authenticate_binds_principal_once() {
        let (conn, _rx) = make_connection();
        conn.authenticate(PrincipalId::from("alice")).unwrap();
        assert_eq!(conn.state(), ConnectionState::Authenticated);
        assert_eq!(conn.principal().map(PrincipalId::as_str), Some("alice"));

        let again = conn.authenticate(PrincipalId::from("bob"));
        assert_matches!(again, Err(TriageError::InvalidTransition { .. }));
        assert_eq!(conn.principal().map(PrincipalId::as_str), Some("alice"));
    }

    #[test]
    fn transition_reports_previous_state() {
        let (conn, _rx) = make_connection();
        conn.authenticate(PrincipalId::from("alice")).unwrap();
        let prev = conn.transition(ConnectionState::Active).unwrap();
        assert_eq!(prev, ConnectionState::Authenticated);
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn illegal_transition_leaves_state() {
        let (conn, _rx) = make_connection();
        let err = conn.transition(ConnectionState::Active).unwrap_err();
        assert_matches!(
            err,
            TriageError::InvalidTransition {
                from: "connecting",
                to: "active"
            }
        );
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn closed_cannot_authenticate() {
        let (conn, _rx) = make_connection();
        let _ = conn.transition(ConnectionState::Closed).unwrap();
        assert!(conn.authenticate(PrincipalId::from("alice")).is_err());
        assert!(conn.principal().is_none());
    }

    #[test]
    fn debug_shows_identity_and_state() {
        let (conn, _rx) = make_connection();
        conn.authenticate(PrincipalId::from("alice")).unwrap();
        let rendered = format!("{conn:?}");
        assert!(rendered.contains("conn_1"));
        assert!(rendered.contains("alice"));
        assert!(rendered.contains("Authenticated"));
    }

    #[tokio::test]
    async fn send_event_encodes_frame() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send_event(&Event::connected()));
        let msg = rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["event"], "connection_response");
    }

    #[tokio::test]
    async fn send_to_full_channel_counts_drop() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::new(), tx);
        assert!(conn.send(Arc::new("msg1".into())));
        assert!(!conn.send(Arc::new("msg2".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_closed_channel_returns_false() {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::new(), tx);
        drop(rx);
        assert!(!conn.send(Arc::new("hello".into())));
    }

    #[tokio::test]
    async fn sends_arrive_in_order() {
        let (conn, mut rx) = make_connection();
        for i in 0..5 {
            assert!(conn.send(Arc::new(format!("msg_{i}"))));
        }
        for i in 0..5 {
            assert_eq!(&*rx.recv().await.unwrap(), &format!("msg_{i}"));
        }
    }

    #[test]
    fn check_alive_resets_flag() {
        let (conn, _rx) = make_connection();
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }
}
