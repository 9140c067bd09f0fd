//! Presence registry for Beacon.
//!
//! A connection-keyed directory of users with a reverse lookup by logical
//! user id. Records survive a disconnect so a fast reconnect can reclaim
//! its identity; the broker deletes them after the grace window or when the
//! sweeper finds them expired.

use crate::ids::{generate_user_id, now_ms};
use beacon_protocol::UserSummary;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// A registered participant.
#[derive(Debug, Clone)]
pub struct User {
    /// Stable logical identifier, unique across the registry.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Current live transport connection; `None` when offline.
    pub connection_id: Option<String>,
    pub online: bool,
    /// Updated on registration and on disconnect, in ms since the epoch.
    pub last_seen: u64,
}

impl User {
    /// Snapshot row for presence broadcasts.
    #[must_use]
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            online: self.online,
            last_seen: self.last_seen,
        }
    }
}

/// Default display name, derived from the connection identity.
fn default_name(connection_id: &str) -> String {
    let chars: Vec<char> = connection_id.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(6)..].iter().collect();
    format!("guest-{tail}")
}

/// Directory of users keyed by logical id, with a connection reverse index.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// Users by logical id.
    users: HashMap<String, User>,
    /// Live connection id to logical user id.
    by_connection: HashMap<String, String>,
    /// Logical ids in insertion order, for stable snapshots.
    order: Vec<String>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked users, online or offline.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Number of users currently online.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.users.values().filter(|u| u.online).count()
    }

    /// Bind a logical identity to a connection, creating or refreshing the
    /// record. Always succeeds; a fresh id is generated when none is
    /// requested. A later registration with an id already held by another
    /// connection supersedes that connection's mapping.
    pub fn register(
        &mut self,
        connection_id: &str,
        requested_id: Option<&str>,
        requested_name: Option<&str>,
    ) -> User {
        // A connection re-registering under a different id releases its old
        // identity, which stays in the registry as an offline record.
        if let Some(previous) = self.by_connection.get(connection_id).cloned() {
            if requested_id != Some(previous.as_str()) {
                if let Some(old) = self.users.get_mut(&previous) {
                    old.online = false;
                    old.connection_id = None;
                    old.last_seen = now_ms();
                }
                self.by_connection.remove(connection_id);
            }
        }

        let id = requested_id.map_or_else(generate_user_id, str::to_string);

        let user = match self.users.get_mut(&id) {
            Some(user) => {
                if let Some(old_connection) = user.connection_id.take() {
                    self.by_connection.remove(&old_connection);
                }
                user.connection_id = Some(connection_id.to_string());
                user.online = true;
                user.last_seen = now_ms();
                if let Some(name) = requested_name {
                    user.name = name.to_string();
                }
                user.clone()
            }
            None => {
                let user = User {
                    id: id.clone(),
                    name: requested_name
                        .map_or_else(|| default_name(connection_id), str::to_string),
                    connection_id: Some(connection_id.to_string()),
                    online: true,
                    last_seen: now_ms(),
                };
                self.users.insert(id.clone(), user.clone());
                self.order.push(id.clone());
                user
            }
        };

        self.by_connection
            .insert(connection_id.to_string(), id.clone());
        debug!(user = %id, connection = %connection_id, "Registered");
        user
    }

    /// Resolve the user owning a live connection.
    #[must_use]
    pub fn lookup_by_connection(&self, connection_id: &str) -> Option<&User> {
        self.by_connection
            .get(connection_id)
            .and_then(|id| self.users.get(id))
    }

    /// Resolve a user by logical id, regardless of connection.
    #[must_use]
    pub fn lookup_by_user(&self, user_id: &str) -> Option<&User> {
        self.users.get(user_id)
    }

    /// Flip a connection's user offline, stamping `last_seen`. The record
    /// stays in place for a graceful reconnection.
    ///
    /// Returns the updated user, or `None` for an unknown connection.
    pub fn mark_offline(&mut self, connection_id: &str) -> Option<User> {
        let id = self.by_connection.remove(connection_id)?;
        let user = self.users.get_mut(&id)?;
        user.online = false;
        user.connection_id = None;
        user.last_seen = now_ms();
        debug!(user = %id, "Marked offline");
        Some(user.clone())
    }

    /// Delete a user record outright.
    pub fn remove(&mut self, user_id: &str) -> Option<User> {
        let user = self.users.remove(user_id)?;
        if let Some(connection_id) = &user.connection_id {
            self.by_connection.remove(connection_id);
        }
        self.order.retain(|id| id != user_id);
        debug!(user = %user_id, "Removed from registry");
        Some(user)
    }

    /// Remove offline users whose `last_seen` is older than the threshold.
    ///
    /// Returns the removed logical ids.
    pub fn prune_stale(&mut self, threshold: Duration) -> Vec<String> {
        let now = now_ms();
        let threshold_ms = threshold.as_millis() as u64;

        let stale: Vec<String> = self
            .users
            .values()
            .filter(|u| !u.online && now.saturating_sub(u.last_seen) > threshold_ms)
            .map(|u| u.id.clone())
            .collect();

        for id in &stale {
            self.remove(id);
        }

        stale
    }

    /// Backdate a user's `last_seen` to exercise expiry paths.
    #[cfg(test)]
    pub(crate) fn set_last_seen(&mut self, user_id: &str, last_seen: u64) {
        if let Some(user) = self.users.get_mut(user_id) {
            user.last_seen = last_seen;
        }
    }

    /// Full presence snapshot in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UserSummary> {
        self.order
            .iter()
            .filter_map(|id| self.users.get(id))
            .map(User::summary)
            .collect()
    }
}
