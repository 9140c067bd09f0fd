//! Event types for the Beacon protocol.
//!
//! Every message on the wire is an event envelope: an `event` name plus a
//! `data` payload. Field names follow the camelCase convention of the
//! browser clients this protocol serves.

use serde::{Deserialize, Serialize};

/// Current protocol version, negotiated in the `connected` event.
pub const PROTOCOL_VERSION: u8 = 1;

/// Events sent by clients to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Register a logical user identity for this connection.
    #[serde(rename_all = "camelCase")]
    Register {
        /// Stable logical id; generated by the broker when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        /// Display name; defaulted from the connection id when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Join a named room. Acknowledged with `ack` or `error`.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Request id echoed in the acknowledgment.
        id: u64,
        room_id: String,
    },

    /// Leave a named room. Acknowledged with `ack` or `error`.
    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        /// Request id echoed in the acknowledgment.
        id: u64,
        room_id: String,
    },

    /// Relay an opaque signaling body (offer/answer/ICE) to a user.
    #[serde(rename_all = "camelCase")]
    Signal {
        /// Target logical user id.
        to: String,
        /// Opaque signaling body, forwarded verbatim.
        #[serde(flatten)]
        body: serde_json::Value,
    },

    /// Send a direct chat message to a user.
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        recipient_id: String,
        content: String,
        /// Message kind, "text" when absent.
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },

    /// Typing indicator, best-effort.
    #[serde(rename_all = "camelCase")]
    Typing {
        recipient_id: String,
        is_typing: bool,
    },

    /// Keepalive ping.
    #[serde(rename_all = "camelCase")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

/// Events sent by the broker to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Connection established handshake.
    #[serde(rename_all = "camelCase")]
    Connected {
        connection_id: String,
        version: u8,
        /// Recommended keepalive interval in milliseconds.
        heartbeat: u32,
    },

    /// Registration succeeded.
    #[serde(rename_all = "camelCase")]
    UserRegistered {
        user_id: String,
        name: String,
        /// Transport group addressing this user directly.
        personal_room: String,
    },

    /// Full presence snapshot, sent on connect and after every presence change.
    #[serde(rename_all = "camelCase")]
    UserList { users: Vec<UserSummary> },

    /// A user joined a room the recipient is in.
    #[serde(rename_all = "camelCase")]
    UserJoinedRoom {
        user_id: String,
        user_name: String,
        room_id: String,
    },

    /// A user left a room the recipient is in.
    #[serde(rename_all = "camelCase")]
    UserLeftRoom {
        user_id: String,
        user_name: String,
        room_id: String,
    },

    /// Relayed signaling body, annotated with the sender identity.
    #[serde(rename_all = "camelCase")]
    Signal {
        from: String,
        from_name: String,
        timestamp: u64,
        #[serde(flatten)]
        body: serde_json::Value,
    },

    /// A signal could not be relayed; reported to the sender.
    #[serde(rename_all = "camelCase")]
    SignalError {
        error: String,
        target_user_id: String,
        original_signal: serde_json::Value,
    },

    /// Relayed chat message envelope.
    ChatMessage(ChatEnvelope),

    /// Delivery confirmation for the sender of a chat message.
    #[serde(rename_all = "camelCase")]
    MessageDelivered {
        message_id: u64,
        delivered_to: String,
        timestamp: u64,
    },

    /// The chat recipient is unknown or offline; nothing was buffered.
    #[serde(rename_all = "camelCase")]
    MessageOffline {
        message_id: u64,
        recipient_id: String,
        timestamp: u64,
    },

    /// Unexpected fault while relaying a chat message.
    #[serde(rename_all = "camelCase")]
    MessageError {
        error: String,
        original_message: serde_json::Value,
    },

    /// Relayed typing indicator.
    #[serde(rename_all = "camelCase")]
    Typing {
        user_id: String,
        user_name: String,
        is_typing: bool,
        timestamp: u64,
    },

    /// Positive acknowledgment of a room request.
    #[serde(rename_all = "camelCase")]
    Ack {
        /// Request id being acknowledged.
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    /// Negative acknowledgment of a room request.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Request id that failed (0 if not applicable).
        id: u64,
        code: u16,
        message: String,
    },

    /// Keepalive pong.
    #[serde(rename_all = "camelCase")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Create an `ack` event for a room request.
    #[must_use]
    pub fn ack(id: u64, room_id: impl Into<String>) -> Self {
        ServerEvent::Ack {
            id,
            room_id: Some(room_id.into()),
        }
    }

    /// Create an `error` event for a failed room request.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Get the wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::UserRegistered { .. } => "user-registered",
            ServerEvent::UserList { .. } => "user-list",
            ServerEvent::UserJoinedRoom { .. } => "user-joined-room",
            ServerEvent::UserLeftRoom { .. } => "user-left-room",
            ServerEvent::Signal { .. } => "signal",
            ServerEvent::SignalError { .. } => "signal-error",
            ServerEvent::ChatMessage(_) => "chat-message",
            ServerEvent::MessageDelivered { .. } => "message-delivered",
            ServerEvent::MessageOffline { .. } => "message-offline",
            ServerEvent::MessageError { .. } => "message-error",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::Ack { .. } => "ack",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong { .. } => "pong",
        }
    }
}

/// One row of a presence snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub online: bool,
    pub last_seen: u64,
}

/// Delivery state stamped on a chat envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Offline,
}

/// A routed chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEnvelope {
    pub message_id: u64,
    pub sender_id: String,
    pub sender_name: String,
    pub recipient_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: u64,
    pub delivery_status: DeliveryStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_event_wire_names() {
        let event = ClientEvent::JoinRoom {
            id: 7,
            room_id: "lobby".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "join-room");
        assert_eq!(value["data"]["roomId"], "lobby");
    }

    #[test]
    fn signal_body_is_flattened() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "signal",
            "data": {"to": "u2", "type": "offer", "sdp": "v=0"}
        }))
        .unwrap();

        match event {
            ClientEvent::Signal { to, body } => {
                assert_eq!(to, "u2");
                assert_eq!(body["type"], "offer");
                assert_eq!(body["sdp"], "v=0");
            }
            other => panic!("expected signal, got {other:?}"),
        }
    }

    #[test]
    fn chat_kind_defaults_to_none() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "chat-message",
            "data": {"recipientId": "u2", "content": "hi"}
        }))
        .unwrap();

        assert_eq!(
            event,
            ClientEvent::ChatMessage {
                recipient_id: "u2".into(),
                content: "hi".into(),
                kind: None,
            }
        );
    }

    #[test]
    fn server_event_names_match_wire_tags() {
        let events = vec![
            ServerEvent::ack(1, "lobby"),
            ServerEvent::error(2, 1002, "nope"),
            ServerEvent::UserList { users: vec![] },
            ServerEvent::MessageOffline {
                message_id: 1,
                recipient_id: "u2".into(),
                timestamp: 0,
            },
        ];

        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["event"], event.name());
        }
    }

    #[test]
    fn envelope_uses_camel_case_and_type_alias() {
        let envelope = ChatEnvelope {
            message_id: 42,
            sender_id: "u1".into(),
            sender_name: "Alice".into(),
            recipient_id: "u2".into(),
            content: "hi".into(),
            kind: "text".into(),
            timestamp: 1,
            delivery_status: DeliveryStatus::Delivered,
        };

        let value = serde_json::to_value(ServerEvent::ChatMessage(envelope)).unwrap();
        assert_eq!(value["event"], "chat-message");
        assert_eq!(value["data"]["messageId"], 42);
        assert_eq!(value["data"]["type"], "text");
        assert_eq!(value["data"]["deliveryStatus"], "delivered");
    }

    #[test]
    fn relayed_signal_carries_sender_annotation() {
        let event = ServerEvent::Signal {
            from: "u1".into(),
            from_name: "Alice".into(),
            timestamp: 123,
            body: json!({"type": "answer", "sdp": "v=0"}),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["from"], "u1");
        assert_eq!(value["data"]["type"], "answer");
        assert_eq!(value["data"]["timestamp"], 123);
    }
}
