//! Transport collaborator contract.
//!
//! The broker core never talks to sockets directly; it issues outbound
//! events through this trait. Implementations are expected to enqueue and
//! return promptly (fire-and-forget), preserving per-handler issuing order.

use async_trait::async_trait;
use beacon_protocol::ServerEvent;
use thiserror::Error;

/// Errors surfaced by the transport collaborator.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The target connection is no longer live.
    #[error("Connection gone: {0}")]
    ConnectionGone(String),

    /// A group membership operation failed.
    #[error("Group operation failed: {0}")]
    Group(String),
}

/// Outbound event channel offered by the transport layer.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver an event to a single connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is gone.
    async fn send_to(&self, connection_id: &str, event: ServerEvent) -> Result<(), SinkError>;

    /// Deliver an event to every live connection. Best-effort.
    async fn broadcast(&self, event: ServerEvent);

    /// Deliver an event to a named group, optionally excluding one
    /// connection. Best-effort.
    async fn broadcast_to_group(&self, group: &str, event: ServerEvent, exclude: Option<&str>);

    /// Add a connection to a named group.
    ///
    /// # Errors
    ///
    /// Returns an error if the group membership could not be updated.
    async fn add_to_group(&self, connection_id: &str, group: &str) -> Result<(), SinkError>;

    /// Remove a connection from a named group.
    ///
    /// # Errors
    ///
    /// Returns an error if the group membership could not be updated.
    async fn remove_from_group(&self, connection_id: &str, group: &str) -> Result<(), SinkError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording sink for broker tests.

    use super::{EventSink, SinkError};
    use async_trait::async_trait;
    use beacon_protocol::ServerEvent;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    /// One recorded outbound call.
    #[derive(Debug, Clone)]
    pub enum Sent {
        To(String, ServerEvent),
        Broadcast(ServerEvent),
        Group {
            group: String,
            exclude: Option<String>,
            event: ServerEvent,
        },
    }

    /// An [`EventSink`] that records every call for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<Sent>>,
        pub dead_connections: Mutex<HashSet<String>>,
        pub fail_group_ops: AtomicBool,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn clear(&self) {
            self.sent.lock().await.clear();
        }

        pub async fn all(&self) -> Vec<Sent> {
            self.sent.lock().await.clone()
        }

        /// Events sent directly to one connection.
        pub async fn sent_to(&self, connection_id: &str) -> Vec<ServerEvent> {
            self.sent
                .lock()
                .await
                .iter()
                .filter_map(|s| match s {
                    Sent::To(conn, event) if conn == connection_id => Some(event.clone()),
                    _ => None,
                })
                .collect()
        }

        /// Group broadcasts for one room.
        pub async fn group_events(&self, group: &str) -> Vec<(Option<String>, ServerEvent)> {
            self.sent
                .lock()
                .await
                .iter()
                .filter_map(|s| match s {
                    Sent::Group {
                        group: g,
                        exclude,
                        event,
                    } if g == group => Some((exclude.clone(), event.clone())),
                    _ => None,
                })
                .collect()
        }

        pub async fn mark_dead(&self, connection_id: &str) {
            self.dead_connections
                .lock()
                .await
                .insert(connection_id.to_string());
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send_to(
            &self,
            connection_id: &str,
            event: ServerEvent,
        ) -> Result<(), SinkError> {
            if self.dead_connections.lock().await.contains(connection_id) {
                return Err(SinkError::ConnectionGone(connection_id.to_string()));
            }
            self.sent
                .lock()
                .await
                .push(Sent::To(connection_id.to_string(), event));
            Ok(())
        }

        async fn broadcast(&self, event: ServerEvent) {
            self.sent.lock().await.push(Sent::Broadcast(event));
        }

        async fn broadcast_to_group(
            &self,
            group: &str,
            event: ServerEvent,
            exclude: Option<&str>,
        ) {
            self.sent.lock().await.push(Sent::Group {
                group: group.to_string(),
                exclude: exclude.map(str::to_string),
                event,
            });
        }

        async fn add_to_group(&self, connection_id: &str, group: &str) -> Result<(), SinkError> {
            if self.fail_group_ops.load(Ordering::SeqCst) {
                return Err(SinkError::Group(format!(
                    "cannot add {connection_id} to {group}"
                )));
            }
            Ok(())
        }

        async fn remove_from_group(
            &self,
            connection_id: &str,
            group: &str,
        ) -> Result<(), SinkError> {
            if self.fail_group_ops.load(Ordering::SeqCst) {
                return Err(SinkError::Group(format!(
                    "cannot remove {connection_id} from {group}"
                )));
            }
            Ok(())
        }
    }
}
