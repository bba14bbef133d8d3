//! Principal-keyed rooms and event fan-out.
//!
//! A room is the set of live connections of one principal. Membership is
//! non-owning (`Weak`): the session task owns the connection, and an entry
//! whose connection is gone is pruned on the next broadcast to that room.
//!
//! The lock is held only to snapshot or mutate membership; frames are queued
//! after it is released, so a slow consumer never blocks `join`/`leave` or a
//! broadcast to another room.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, warn};
use triage_core::events::Event;
use triage_core::{ConnectionId, PrincipalId};

use super::connection::ClientConnection;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

#[derive(Default)]
struct Rooms {
    members: HashMap<PrincipalId, HashMap<ConnectionId, Weak<ClientConnection>>>,
    /// Reverse index; a connection is in at most one room.
    room_of: HashMap<ConnectionId, PrincipalId>,
}

impl Rooms {
    fn remove(&mut self, principal: &PrincipalId, connection_id: &ConnectionId) -> bool {
        let Some(room) = self.members.get_mut(principal) else {
            return false;
        };
        let removed = room.remove(connection_id).is_some();
        if room.is_empty() {
            let _ = self.members.remove(principal);
        }
        if removed {
            let _ = self.room_of.remove(connection_id);
        }
        removed
    }
}

/// Registry of rooms, shared by the lifecycle and the emitter.
#[derive(Default)]
pub struct RoomRegistry {
    inner: RwLock<Rooms>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to the room of `principal`.
    ///
    /// Idempotent. A connection already in another room is moved.
    /// Returns `true` if membership changed.
    pub fn join(&self, principal: &PrincipalId, connection: &Arc<ClientConnection>) -> bool {
        let mut rooms = self.inner.write();
        if let Some(current) = rooms.room_of.get(&connection.id).cloned() {
            if &current == principal {
                return false;
            }
            let _ = rooms.remove(&current, &connection.id);
        }
        let _ = rooms
            .members
            .entry(principal.clone())
            .or_default()
            .insert(connection.id.clone(), Arc::downgrade(connection));
        let _ = rooms.room_of.insert(connection.id.clone(), principal.clone());
        debug!(%principal, connection_id = %connection.id, "joined room");
        true
    }

    /// Remove `connection_id` from the room of `principal`.
    ///
    /// Removing an absent member is a no-op. Returns `true` if removed.
    pub fn leave(&self, principal: &PrincipalId, connection_id: &ConnectionId) -> bool {
        let removed = self.inner.write().remove(principal, connection_id);
        if removed {
            debug!(%principal, %connection_id, "left room");
        }
        removed
    }

    /// Deliver `event` to every live member of `principal`'s room.
    ///
    /// Returns the number of connections the frame was queued for. A
    /// principal with no room is a successful no-op.
    pub fn broadcast(&self, principal: &PrincipalId, event: &Event) -> usize {
        let json = match event.to_json() {
            Ok(json) => Arc::new(json),
            Err(error) => {
                warn!(event = event.kind().as_str(), %error, "failed to serialize event");
                return 0;
            }
        };

        let (live, dead) = self.snapshot(principal);

        let mut delivered = 0;
        for conn in &live {
            if conn.send(Arc::clone(&json)) {
                delivered += 1;
            } else {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(
                    connection_id = %conn.id,
                    %principal,
                    event = event.kind().as_str(),
                    "failed to queue event for client"
                );
            }
        }

        if !dead.is_empty() {
            self.prune(principal, &dead);
        }

        debug!(
            event = event.kind().as_str(),
            %principal,
            recipients = delivered,
            "broadcast event to room"
        );
        delivered
    }

    fn snapshot(&self, principal: &PrincipalId) -> (Vec<Arc<ClientConnection>>, Vec<ConnectionId>) {
        let rooms = self.inner.read();
        let mut live = Vec::new();
        let mut dead = Vec::new();
        if let Some(room) = rooms.members.get(principal) {
            for (id, weak) in room {
                match weak.upgrade() {
                    Some(conn) => live.push(conn),
                    None => dead.push(id.clone()),
                }
            }
        }
        (live, dead)
    }

    fn prune(&self, principal: &PrincipalId, dead: &[ConnectionId]) {
        let mut rooms = self.inner.write();
        for id in dead {
            let still_dead = rooms
                .members
                .get(principal)
                .and_then(|room| room.get(id))
                .is_some_and(|weak| weak.strong_count() == 0);
            if still_dead {
                let _ = rooms.remove(principal, id);
                debug!(%principal, connection_id = %id, "pruned dead room member");
            }
        }
    }

    /// Live members of `principal`'s room.
    pub fn members(&self, principal: &PrincipalId) -> Vec<Arc<ClientConnection>> {
        self.snapshot(principal).0
    }

    /// Number of entries in `principal`'s room.
    pub fn room_size(&self, principal: &PrincipalId) -> usize {
        self.inner.read().members.get(principal).map_or(0, HashMap::len)
    }

    /// Room the connection belongs to, if any.
    pub fn room_of(&self, connection_id: &ConnectionId) -> Option<PrincipalId> {
        self.inner.read().room_of.get(connection_id).cloned()
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.inner.read().members.len()
    }

    /// Number of connections across all rooms.
    pub fn connection_count(&self) -> usize {
        self.inner.read().room_of.len()
    }
}
