//! Message types exchanged between a hub server and its clients.
//!
//! - [`ClientMessage`] (inbound to the server): handshake, keepalive, goodbye
//! - [`ServerMessage`] (outbound): handshake verdict, reading updates, pongs
//!
//! Enums are externally tagged so the same types work in JSON and postcard.

use crate::core::types::{VersionedReading, WeightReading};
use serde::{Deserialize, Serialize};

/// Messages a client sends
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// First message on every connection
    Hello {
        client_name: String,
        credential: Option<String>,
    },
    /// Keepalive; answered with a pong carrying the same nonce
    Ping { nonce: u64 },
    /// Attempt to push a reading into the hub. Always refused: only the
    /// server's own scale writes the current reading.
    Publish { reading: WeightReading },
    /// Orderly goodbye
    Bye,
}

/// Messages the server sends
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Handshake accepted; `snapshot` is the current reading at that moment
    Welcome {
        session_id: u64,
        snapshot: VersionedReading,
    },
    /// Handshake refused; the connection closes after this
    Rejected { reason: String },
    /// A newer reading
    Update { reading: VersionedReading },
    Pong { nonce: u64 },
    /// The client asked for something it may not do; the session stays open
    Refused { reason: String },
    /// Session closed by the server (idle timeout or shutdown)
    Evicted { reason: String },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "hello",
            ClientMessage::Ping { .. } => "ping",
            ClientMessage::Publish { .. } => "publish",
            ClientMessage::Bye => "bye",
        }
    }
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::Rejected { .. } => "rejected",
            ServerMessage::Update { .. } => "update",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Refused { .. } => "refused",
            ServerMessage::Evicted { .. } => "evicted",
        }
    }
}
