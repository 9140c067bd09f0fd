//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon signaling broker.
//!
//! This crate defines the event envelopes exchanged between clients and the
//! broker, plus the length-prefixed MessagePack codec that frames them.
//!
//! ## Event Envelopes
//!
//! - [`ClientEvent`] - inbound: `register`, `join-room`, `leave-room`,
//!   `signal`, `chat-message`, `typing`
//! - [`ServerEvent`] - outbound: presence snapshots, relayed payloads,
//!   delivery reports, acknowledgments
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::JoinRoom { id: 1, room_id: "lobby".into() };
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded: ClientEvent = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, decode_from, encode, ProtocolError};
pub use events::{
    ChatEnvelope, ClientEvent, DeliveryStatus, ServerEvent, UserSummary, PROTOCOL_VERSION,
};
