//! WebSocket gateway: the transport side of the broker's event sink.
//!
//! Each live connection owns an unbounded outbound queue drained by its
//! socket task, so sink calls enqueue and return without touching the
//! network. Groups are the transport-level fan-out sets used for rooms and
//! per-user addressing.

use async_trait::async_trait;
use beacon_core::{EventSink, SinkError};
use beacon_protocol::ServerEvent;
use dashmap::{DashMap, DashSet};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::debug;

/// Generate a unique connection id.
#[must_use]
pub fn generate_connection_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("conn_{:x}", timestamp)
}

/// Connection and group tables backing the [`EventSink`] contract.
#[derive(Default)]
pub struct WsGateway {
    /// Outbound queues by connection id.
    connections: DashMap<String, mpsc::UnboundedSender<ServerEvent>>,
    /// Group name to member connection ids.
    groups: DashMap<String, DashSet<String>>,
}

impl WsGateway {
    /// Create an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Attach a connection, returning the receiver its socket task drains.
    pub fn register_connection(&self, connection_id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(connection_id.to_string(), tx);
        debug!(connection = %connection_id, "Gateway attached connection");
        rx
    }

    /// Detach a connection and drop it from every group.
    pub fn remove_connection(&self, connection_id: &str) {
        self.connections.remove(connection_id);
        self.groups.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
        debug!(connection = %connection_id, "Gateway detached connection");
    }
}

#[async_trait]
impl EventSink for WsGateway {
    async fn send_to(&self, connection_id: &str, event: ServerEvent) -> Result<(), SinkError> {
        let sender = self
            .connections
            .get(connection_id)
            .ok_or_else(|| SinkError::ConnectionGone(connection_id.to_string()))?;

        sender
            .send(event)
            .map_err(|_| SinkError::ConnectionGone(connection_id.to_string()))
    }

    async fn broadcast(&self, event: ServerEvent) {
        for entry in self.connections.iter() {
            let _ = entry.value().send(event.clone());
        }
    }

    async fn broadcast_to_group(&self, group: &str, event: ServerEvent, exclude: Option<&str>) {
        let Some(members) = self.groups.get(group) else {
            return;
        };

        for member in members.iter() {
            if exclude == Some(member.as_str()) {
                continue;
            }
            if let Some(sender) = self.connections.get(member.key()) {
                let _ = sender.send(event.clone());
            }
        }
    }

    async fn add_to_group(&self, connection_id: &str, group: &str) -> Result<(), SinkError> {
        if !self.connections.contains_key(connection_id) {
            return Err(SinkError::ConnectionGone(connection_id.to_string()));
        }

        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(connection_id.to_string());
        Ok(())
    }

    async fn remove_from_group(&self, connection_id: &str, group: &str) -> Result<(), SinkError> {
        if let Some(members) = self.groups.get(group) {
            members.remove(connection_id);
            let now_empty = members.is_empty();
            drop(members);
            if now_empty {
                self.groups.remove_if(group, |_, members| members.is_empty());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_event() -> ServerEvent {
        ServerEvent::Connected {
            connection_id: "conn-1".into(),
            version: 1,
            heartbeat: 30_000,
        }
    }

    #[tokio::test]
    async fn send_to_enqueues_for_connection() {
        let gateway = WsGateway::new();
        let mut rx = gateway.register_connection("conn-1");

        gateway.send_to("conn-1", connected_event()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), connected_event());
    }

    #[tokio::test]
    async fn send_to_unknown_connection_fails() {
        let gateway = WsGateway::new();
        assert!(matches!(
            gateway.send_to("conn-9", connected_event()).await,
            Err(SinkError::ConnectionGone(_))
        ));
    }

    #[tokio::test]
    async fn group_broadcast_honors_exclusion() {
        let gateway = WsGateway::new();
        let mut rx1 = gateway.register_connection("conn-1");
        let mut rx2 = gateway.register_connection("conn-2");
        gateway.add_to_group("conn-1", "lobby").await.unwrap();
        gateway.add_to_group("conn-2", "lobby").await.unwrap();

        gateway
            .broadcast_to_group("lobby", connected_event(), Some("conn-1"))
            .await;

        assert_eq!(rx2.recv().await.unwrap(), connected_event());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn add_to_group_requires_live_connection() {
        let gateway = WsGateway::new();
        assert!(gateway.add_to_group("conn-9", "lobby").await.is_err());
    }

    #[tokio::test]
    async fn remove_connection_prunes_groups() {
        let gateway = WsGateway::new();
        let _rx = gateway.register_connection("conn-1");
        gateway.add_to_group("conn-1", "lobby").await.unwrap();

        gateway.remove_connection("conn-1");

        assert_eq!(gateway.connection_count(), 0);
        // The emptied group is gone; broadcasting to it is a no-op.
        gateway
            .broadcast_to_group("lobby", connected_event(), None)
            .await;
        assert!(gateway.groups.get("lobby").is_none());
    }

    #[tokio::test]
    async fn broadcast_reaches_all_connections() {
        let gateway = WsGateway::new();
        let mut rx1 = gateway.register_connection("conn-1");
        let mut rx2 = gateway.register_connection("conn-2");

        gateway.broadcast(connected_event()).await;

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }
}
