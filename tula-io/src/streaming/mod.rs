//! Hub network protocol: message types and length-prefixed framing

pub mod messages;
pub mod wire;

pub use messages::{ClientMessage, ServerMessage};
pub use wire::{FrameReader, MAX_MESSAGE_LEN, Serializer, WireFormat, is_disconnect, write_frame};
