//! # beacon-core
//!
//! Presence tracking, room membership indexing, and message routing for the
//! Beacon signaling broker.
//!
//! This crate provides the in-memory coordination logic:
//!
//! - **PresenceRegistry** - connection-keyed user directory with reverse
//!   lookup by logical user id
//! - **RoomIndex** - bidirectional room/connection membership mapping
//! - **Broker** - event dispatch façade: registration, room membership,
//!   signal/chat/typing relays, disconnect handling, presence sweeping
//! - **EventSink** - the transport collaborator contract the broker emits
//!   outbound events through
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌───────────────┐
//! │  Transport  │────▶│   Broker    │────▶│   EventSink   │
//! └─────────────┘     └─────────────┘     └───────────────┘
//!                        │        │
//!                        ▼        ▼
//!              ┌──────────────┐ ┌───────────┐
//!              │ PresenceReg. │ │ RoomIndex │
//!              └──────────────┘ └───────────┘
//! ```
//!
//! All shared state sits behind a single mutex owned by the [`Broker`], so
//! every inbound event handler is an atomic transaction against both
//! indices.

pub mod broker;
pub mod ids;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod sink;

pub use broker::{Broker, BrokerConfig, BrokerStats};
pub use presence::{PresenceRegistry, User};
pub use rooms::RoomIndex;
pub use sink::{EventSink, SinkError};
