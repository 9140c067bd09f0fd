//! Message routing: signal, chat, and typing relays.
//!
//! All three relays resolve a logical user id to a live connection through
//! the presence registry, then differ only in failure visibility: signaling
//! and chat report undeliverable outcomes to the sender, typing never does.

use crate::broker::Broker;
use crate::ids::{generate_message_id, now_ms};
use beacon_protocol::{ChatEnvelope, DeliveryStatus, ServerEvent};
use serde_json::json;
use tracing::{debug, error, warn};

impl Broker {
    /// Relay an opaque signaling body to a target user.
    ///
    /// One delivery attempt, no queueing. An unknown or offline target is
    /// reported back to the sender as `signal-error`; the sender decides
    /// whether to retry.
    pub async fn handle_signal(&self, connection_id: &str, to: &str, body: serde_json::Value) {
        let state = self.state.lock().await;
        let Some(sender) = state.registry.lookup_by_connection(connection_id) else {
            warn!(connection = %connection_id, "Signal from unregistered connection dropped");
            return;
        };

        let target_connection = state
            .registry
            .lookup_by_user(to)
            .filter(|t| t.online)
            .and_then(|t| t.connection_id.clone());

        match target_connection {
            Some(target) => {
                let event = ServerEvent::Signal {
                    from: sender.id.clone(),
                    from_name: sender.name.clone(),
                    timestamp: now_ms(),
                    body,
                };
                if let Err(e) = self.sink().send_to(&target, event).await {
                    warn!(target = %to, error = %e, "Signal delivery failed");
                } else {
                    debug!(from = %sender.id, to = %to, "Signal relayed");
                }
            }
            None => {
                let _ = self
                    .sink()
                    .send_to(
                        connection_id,
                        ServerEvent::SignalError {
                            error: "target not found or offline".into(),
                            target_user_id: to.to_string(),
                            original_signal: body,
                        },
                    )
                    .await;
            }
        }
    }

    /// Relay a direct chat message.
    ///
    /// An online recipient gets the envelope and the sender gets a
    /// `message-delivered` confirmation; an unknown or offline recipient
    /// turns into `message-offline` for the sender with nothing buffered.
    /// A fault while delivering to a resolved recipient is the one path
    /// surfaced as `message-error`.
    pub async fn handle_chat(
        &self,
        connection_id: &str,
        recipient_id: &str,
        content: String,
        kind: Option<String>,
    ) {
        let state = self.state.lock().await;
        let Some(sender) = state.registry.lookup_by_connection(connection_id) else {
            warn!(connection = %connection_id, "Chat from unregistered connection dropped");
            return;
        };

        let envelope = ChatEnvelope {
            message_id: generate_message_id(),
            sender_id: sender.id.clone(),
            sender_name: sender.name.clone(),
            recipient_id: recipient_id.to_string(),
            content,
            kind: kind.unwrap_or_else(|| "text".to_string()),
            timestamp: now_ms(),
            delivery_status: DeliveryStatus::Delivered,
        };

        let target_connection = state
            .registry
            .lookup_by_user(recipient_id)
            .filter(|t| t.online)
            .and_then(|t| t.connection_id.clone());

        match target_connection {
            Some(target) => {
                match self
                    .sink()
                    .send_to(&target, ServerEvent::ChatMessage(envelope.clone()))
                    .await
                {
                    Ok(()) => {
                        let _ = self
                            .sink()
                            .send_to(
                                connection_id,
                                ServerEvent::MessageDelivered {
                                    message_id: envelope.message_id,
                                    delivered_to: envelope.recipient_id,
                                    timestamp: envelope.timestamp,
                                },
                            )
                            .await;
                    }
                    Err(e) => {
                        error!(recipient = %recipient_id, error = %e, "Chat delivery fault");
                        let original = json!({
                            "recipientId": envelope.recipient_id,
                            "content": envelope.content,
                            "type": envelope.kind,
                        });
                        let _ = self
                            .sink()
                            .send_to(
                                connection_id,
                                ServerEvent::MessageError {
                                    error: e.to_string(),
                                    original_message: original,
                                },
                            )
                            .await;
                    }
                }
            }
            None => {
                let _ = self
                    .sink()
                    .send_to(
                        connection_id,
                        ServerEvent::MessageOffline {
                            message_id: envelope.message_id,
                            recipient_id: envelope.recipient_id,
                            timestamp: envelope.timestamp,
                        },
                    )
                    .await;
            }
        }
    }

    /// Relay a typing indicator. Best-effort: an unresolved sender or
    /// target drops the event with no feedback.
    pub async fn handle_typing(&self, connection_id: &str, recipient_id: &str, is_typing: bool) {
        let state = self.state.lock().await;
        let Some(sender) = state.registry.lookup_by_connection(connection_id) else {
            debug!(connection = %connection_id, "Typing from unregistered connection dropped");
            return;
        };

        let Some(target) = state
            .registry
            .lookup_by_user(recipient_id)
            .filter(|t| t.online)
            .and_then(|t| t.connection_id.clone())
        else {
            return;
        };

        let _ = self
            .sink()
            .send_to(
                &target,
                ServerEvent::Typing {
                    user_id: sender.id.clone(),
                    user_name: sender.name.clone(),
                    is_typing,
                    timestamp: now_ms(),
                },
            )
            .await;
    }
}
