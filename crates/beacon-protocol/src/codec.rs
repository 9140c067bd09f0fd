//! Length-prefixed MessagePack framing for Beacon events.
//!
//! Each wire message is a 4-byte big-endian length prefix followed by a
//! MessagePack-encoded event envelope. The codec is generic over the event
//! type so both directions share one implementation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum encoded event size (1 MiB). Signaling bodies are small; anything
/// larger is a misbehaving client.
pub const MAX_EVENT_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Event size {0} exceeds maximum {MAX_EVENT_SIZE}")]
    EventTooLarge(usize),

    /// Not enough data to decode an event.
    #[error("Incomplete event: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode an event to length-prefixed bytes.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode<T: Serialize>(event: &T) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;

    if payload.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(buf.freeze())
}

/// Decode a single event from a complete buffer.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let event = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(event)
}

/// Try to decode an event from a streaming buffer, advancing it on success.
///
/// Returns `Ok(Some(event))` if a complete event was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the event is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let event = rmp_serde::from_slice(&payload)?;

    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClientEvent, ServerEvent};
    use serde_json::json;

    #[test]
    fn roundtrip_client_events() {
        let events = vec![
            ClientEvent::Register {
                user_id: Some("u1".into()),
                name: Some("Alice".into()),
            },
            ClientEvent::JoinRoom {
                id: 1,
                room_id: "lobby".into(),
            },
            ClientEvent::Signal {
                to: "u2".into(),
                body: json!({"type": "offer", "sdp": "v=0"}),
            },
            ClientEvent::ChatMessage {
                recipient_id: "u2".into(),
                content: "hi".into(),
                kind: None,
            },
            ClientEvent::Typing {
                recipient_id: "u2".into(),
                is_typing: true,
            },
        ];

        for event in events {
            let encoded = encode(&event).unwrap();
            let decoded: ClientEvent = decode(&encoded).unwrap();
            assert_eq!(event, decoded);
        }
    }

    #[test]
    fn roundtrip_server_events() {
        let events = vec![
            ServerEvent::Connected {
                connection_id: "conn_1".into(),
                version: 1,
                heartbeat: 30_000,
            },
            ServerEvent::SignalError {
                error: "target not found or offline".into(),
                target_user_id: "u2".into(),
                original_signal: json!({"type": "offer"}),
            },
            ServerEvent::ack(3, "lobby"),
        ];

        for event in events {
            let encoded = encode(&event).unwrap();
            let decoded: ServerEvent = decode(&encoded).unwrap();
            assert_eq!(event, decoded);
        }
    }

    #[test]
    fn decode_incomplete() {
        let event = ClientEvent::Ping { timestamp: None };
        let encoded = encode(&event).unwrap();

        match decode::<ClientEvent>(&encoded[..3]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("expected Incomplete error, got {other:?}"),
        }
    }

    #[test]
    fn oversize_event_is_rejected() {
        let event = ClientEvent::ChatMessage {
            recipient_id: "u2".into(),
            content: "x".repeat(MAX_EVENT_SIZE + 1),
            kind: None,
        };

        match encode(&event) {
            Err(ProtocolError::EventTooLarge(_)) => {}
            other => panic!("expected EventTooLarge error, got {other:?}"),
        }
    }

    #[test]
    fn streaming_decode_across_partial_reads() {
        let first = ClientEvent::JoinRoom {
            id: 1,
            room_id: "a".into(),
        };
        let second = ClientEvent::LeaveRoom {
            id: 2,
            room_id: "a".into(),
        };

        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode(&first).unwrap());
        wire.extend_from_slice(&encode(&second).unwrap());

        // Feed the stream a few bytes at a time.
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for chunk in wire.chunks(3) {
            buf.extend_from_slice(chunk);
            while let Some(event) = decode_from::<ClientEvent>(&mut buf).unwrap() {
                decoded.push(event);
            }
        }

        assert_eq!(decoded, vec![first, second]);
        assert!(buf.is_empty());
    }
}
