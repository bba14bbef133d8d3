//! Connection lifecycle state machine.
//!
//! ```text
//! Connecting ──auth ok──▶ Authenticated ──join──▶ Active ──close──▶ Closed
//!     │                        │                                     ▲
//!     └──────auth failed───────┴──────────────close──────────────────┘
//! ```
//!
//! A rejected handshake never reaches a room and emits nothing. Joining and
//! leaving are announced to the principal's room with `connection_response`;
//! `disconnected` is only sent for connections that announced `connected`.
//!
//! A connection slot is reserved before identity is resolved, so the
//! connection limit holds while handshakes are in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use triage_core::events::Event;
use triage_core::{ConnectionId, Result, TriageError};

use super::connection::ClientConnection;
use super::rooms::RoomRegistry;
use crate::identity::{HandshakeContext, IdentityResolver};
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL, WS_REJECTIONS_TOTAL,
};

/// Lifecycle state of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Principal bound, not yet in a room.
    Authenticated,
    /// Member of the principal's room.
    Active,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Lowercase name, used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Authenticated | Self::Closed)
                | (Self::Authenticated, Self::Active | Self::Closed)
                | (Self::Active, Self::Closed)
        )
    }
}

/// Drives connections through the state machine and keeps room
/// membership in step with it.
pub struct ConnectionLifecycle {
    rooms: Arc<RoomRegistry>,
    resolver: Arc<dyn IdentityResolver>,
    open: AtomicUsize,
    max_connections: usize,
}

/// A reserved connection slot. Released on drop unless kept.
struct SlotReservation<'a> {
    open: &'a AtomicUsize,
}

impl SlotReservation<'_> {
    /// Hand the slot to an authenticated connection; `close` releases it.
    fn keep(self) {
        std::mem::forget(self);
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        let _ = self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConnectionLifecycle {
    /// Create a lifecycle manager over `rooms`.
    pub fn new(rooms: Arc<RoomRegistry>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            rooms,
            resolver,
            open: AtomicUsize::new(0),
            max_connections: usize::MAX,
        }
    }

    /// Limit the number of open connections, handshakes included.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Connections holding a slot: handshakes in flight plus
    /// authenticated connections not yet closed.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    /// Configured connection limit.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn reserve_slot(&self) -> Result<SlotReservation<'_>> {
        let max = self.max_connections;
        self.open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map(|_| SlotReservation { open: &self.open })
            .map_err(|_| TriageError::CapacityExceeded { max })
    }

    /// Run the handshake: reserve a slot, resolve identity and bind it.
    ///
    /// On success the connection is `Authenticated` and holds a slot until
    /// [`close`](Self::close). At the limit `CapacityExceeded` is returned
    /// before the resolver runs. Without a principal the connection is
    /// rejected (`Closed`) and `AuthRequired` is returned.
    pub async fn open(
        &self,
        handshake: &HandshakeContext,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Result<Arc<ClientConnection>> {
        let slot = match self.reserve_slot() {
            Ok(slot) => slot,
            Err(error) => {
                counter!(WS_REJECTIONS_TOTAL, "reason" => "capacity").increment(1);
                warn!(max = self.max_connections, "connection limit reached");
                return Err(error);
            }
        };
        let connection = Arc::new(ClientConnection::new(ConnectionId::new(), tx));

        let Some(principal) = self.resolver.resolve(handshake).await else {
            self.reject(&connection);
            return Err(TriageError::AuthRequired);
        };

        connection.authenticate(principal)?;
        slot.keep();
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        debug!(connection_id = %connection.id, principal = ?connection.principal(), "connection authenticated");
        Ok(connection)
    }

    /// Refuse a connection that has no principal. Emits nothing.
    pub fn reject(&self, connection: &ClientConnection) {
        match connection.transition(ConnectionState::Closed) {
            Ok(_) => {
                counter!(WS_REJECTIONS_TOTAL, "reason" => "unauthenticated").increment(1);
                info!(connection_id = %connection.id, "rejected unauthenticated connection");
            }
            Err(error) => warn!(connection_id = %connection.id, %error, "reject on non-connecting connection"),
        }
    }

    /// Join the principal's room and announce the connection to it.
    ///
    /// Returns the number of room members the announcement reached.
    pub fn activate(&self, connection: &Arc<ClientConnection>) -> Result<usize> {
        let principal = connection
            .principal()
            .cloned()
            .ok_or(TriageError::AuthRequired)?;
        let _ = connection.transition(ConnectionState::Active)?;
        let _ = self.rooms.join(&principal, connection);
        let reached = self.rooms.broadcast(&principal, &Event::connected());
        info!(connection_id = %connection.id, %principal, reached, "client connected");
        Ok(reached)
    }

    /// Close a connection. Idempotent.
    ///
    /// Leaves the room and frees the slot. Only a connection that was
    /// `Active` has its departure announced to the remaining members.
    /// Returns `false` if the connection was already closed.
    pub fn close(&self, connection: &ClientConnection) -> bool {
        let previous = match connection.transition(ConnectionState::Closed) {
            Ok(previous) => previous,
            Err(_) => return false,
        };

        if let Some(principal) = connection.principal() {
            let _ = self.rooms.leave(principal, &connection.id);
            let reached = if previous == ConnectionState::Active {
                self.rooms.broadcast(principal, &Event::disconnected())
            } else {
                0
            };
            let _ = self.open.fetch_sub(1, Ordering::AcqRel);
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
            info!(
                connection_id = %connection.id,
                %principal,
                from = previous.as_str(),
                reached,
                drops = connection.drop_count(),
                age_ms = u64::try_from(connection.age().as_millis()).unwrap_or(u64::MAX),
                "client disconnected"
            );
        }
        true
    }
}
