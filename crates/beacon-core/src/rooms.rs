//! Room membership index.
//!
//! A bidirectional mapping: rooms to member connections, and users to the
//! rooms they joined. A room exists exactly as long as its member set is
//! non-empty; empty rooms are pruned on the spot rather than flagged.

use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Bidirectional room membership index.
#[derive(Debug, Default)]
pub struct RoomIndex {
    /// Room name to member connection ids.
    members: HashMap<String, HashSet<String>>,
    /// Logical user id to joined room names, for disconnect fan-out.
    user_rooms: HashMap<String, HashSet<String>>,
}

impl RoomIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.members.len()
    }

    /// Check whether a room currently exists (has members).
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.members.contains_key(room)
    }

    /// Check whether a connection is a member of a room.
    #[must_use]
    pub fn is_member(&self, room: &str, connection_id: &str) -> bool {
        self.members
            .get(room)
            .is_some_and(|set| set.contains(connection_id))
    }

    /// Add a connection to a room, creating the room implicitly. Idempotent.
    ///
    /// Returns `true` when membership actually changed, so callers can keep
    /// redundant joins silent.
    pub fn join(&mut self, room: &str, connection_id: &str, user_id: &str) -> bool {
        let inserted = self
            .members
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string());
        self.user_rooms
            .entry(user_id.to_string())
            .or_default()
            .insert(room.to_string());

        if inserted {
            debug!(room = %room, connection = %connection_id, "Joined room");
        }
        inserted
    }

    /// Remove a connection from a room. Idempotent; prunes the room when it
    /// empties.
    ///
    /// Returns `true` when the connection was a member.
    pub fn leave(&mut self, room: &str, connection_id: &str, user_id: &str) -> bool {
        let mut removed = false;
        if let Some(set) = self.members.get_mut(room) {
            removed = set.remove(connection_id);
            if set.is_empty() {
                self.members.remove(room);
            }
        }

        if let Some(rooms) = self.user_rooms.get_mut(user_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.user_rooms.remove(user_id);
            }
        }

        if removed {
            debug!(room = %room, connection = %connection_id, "Left room");
        }
        removed
    }

    /// Member connections of a room; empty for an unknown room.
    #[must_use]
    pub fn members_of(&self, room: &str) -> Vec<String> {
        self.members
            .get(room)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rooms a user's connections have joined.
    #[must_use]
    pub fn rooms_for_user(&self, user_id: &str) -> Vec<String> {
        self.user_rooms
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a disconnecting connection from every room its user joined,
    /// clearing the user's room set.
    ///
    /// Returns the rooms the connection was actually removed from, for
    /// membership-change notifications.
    pub fn remove_user(&mut self, user_id: &str, connection_id: &str) -> Vec<String> {
        let rooms = self.user_rooms.remove(user_id).unwrap_or_default();
        let mut vacated = Vec::with_capacity(rooms.len());

        for room in rooms {
            if let Some(set) = self.members.get_mut(&room) {
                if set.remove(connection_id) {
                    vacated.push(room.clone());
                }
                if set.is_empty() {
                    self.members.remove(&room);
                }
            }
        }

        if !vacated.is_empty() {
            debug!(user = %user_id, rooms = vacated.len(), "Vacated rooms on disconnect");
        }
        vacated
    }

    /// Drop a user's reverse-index entry without touching member sets.
    ///
    /// Safety net for the sweeper; member sets are cleaned at disconnect
    /// time by [`RoomIndex::remove_user`].
    pub fn purge_user(&mut self, user_id: &str) {
        self.user_rooms.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_symmetric(index: &RoomIndex, room: &str, connection_id: &str, user_id: &str) {
        assert_eq!(
            index.is_member(room, connection_id),
            index.rooms_for_user(user_id).contains(&room.to_string()),
            "membership and reverse index diverged for {room}/{user_id}"
        );
    }

    #[test]
    fn join_is_idempotent() {
        let mut index = RoomIndex::new();

        assert!(index.join("lobby", "conn-1", "u1"));
        assert!(!index.join("lobby", "conn-1", "u1"));

        assert_eq!(index.members_of("lobby"), vec!["conn-1"]);
        assert_eq!(index.rooms_for_user("u1"), vec!["lobby"]);
        assert_symmetric(&index, "lobby", "conn-1", "u1");
    }

    #[test]
    fn leave_is_idempotent() {
        let mut index = RoomIndex::new();
        index.join("lobby", "conn-1", "u1");

        assert!(index.leave("lobby", "conn-1", "u1"));
        assert!(!index.leave("lobby", "conn-1", "u1"));
        assert!(!index.leave("nowhere", "conn-1", "u1"));
        assert_symmetric(&index, "lobby", "conn-1", "u1");
    }

    #[test]
    fn empty_rooms_are_pruned_eagerly() {
        let mut index = RoomIndex::new();
        index.join("lobby", "conn-1", "u1");
        index.join("lobby", "conn-2", "u2");

        index.leave("lobby", "conn-1", "u1");
        assert!(index.room_exists("lobby"));

        index.leave("lobby", "conn-2", "u2");
        assert!(!index.room_exists("lobby"));
        assert_eq!(index.room_count(), 0);
    }

    #[test]
    fn remove_user_vacates_all_rooms() {
        let mut index = RoomIndex::new();
        index.join("a", "conn-1", "u1");
        index.join("b", "conn-1", "u1");
        index.join("b", "conn-2", "u2");

        let mut vacated = index.remove_user("u1", "conn-1");
        vacated.sort();
        assert_eq!(vacated, vec!["a", "b"]);

        assert!(!index.room_exists("a"));
        assert!(index.room_exists("b"));
        assert!(index.rooms_for_user("u1").is_empty());
        assert_symmetric(&index, "b", "conn-1", "u1");
    }

    #[test]
    fn purge_user_only_drops_reverse_index() {
        let mut index = RoomIndex::new();
        index.join("a", "conn-1", "u1");
        index.join("a", "conn-2", "u2");

        index.purge_user("u1");
        assert!(index.rooms_for_user("u1").is_empty());
        // The member side is untouched; disconnect is the primary cleanup.
        assert!(index.is_member("a", "conn-1"));
    }
}
