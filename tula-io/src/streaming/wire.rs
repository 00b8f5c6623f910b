//! Wire format serialization and framing
//!
//! # TCP Protocol
//!
//! Every message in both directions is length-prefixed:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Big-endian u32   │ JSON or Postcard binary  │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! - **Maximum message size**: 1MB (1,048,576 bytes); a larger length closes
//!   the connection
//! - Both ends must be configured with the same [`WireFormat`]
//!
//! ## Wire Formats
//!
//! ### JSON (Default)
//! Human-readable, easy to inspect with `nc`. Use for debugging and
//! non-Rust viewers.
//!
//! ### Postcard (Binary)
//! Compact and fast. Use when both ends are this crate.
//!
//! ## Error Handling
//!
//! - **Oversized length**: connection closed
//! - **Deserialization failure**: connection closed; the peer speaks
//!   something else

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};

/// Largest payload accepted in either direction
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Supported wire formats
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Binary format using postcard - fast and compact
    Postcard,
    /// JSON format - human-readable for debugging
    #[default]
    Json,
}

/// Serializer that can handle both formats
#[derive(Debug, Clone, Copy)]
pub struct Serializer {
    format: WireFormat,
}

impl Serializer {
    /// Create a new serializer for the given format
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Serialize a message to bytes
    pub fn serialize<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>> {
        match self.format {
            WireFormat::Postcard => {
                postcard::to_allocvec(msg).map_err(|e| Error::Serialization(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::to_vec(msg).map_err(|e| Error::Serialization(e.to_string()))
            }
        }
    }

    /// Deserialize bytes to a message
    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self.format {
            WireFormat::Postcard => {
                postcard::from_bytes(bytes).map_err(|e| Error::Serialization(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
            }
        }
    }

    /// Serialize and write one length-prefixed message
    pub fn write_message<W: Write, T: Serialize>(&self, writer: &mut W, msg: &T) -> Result<()> {
        let payload = self.serialize(msg)?;
        write_frame(writer, &payload)
    }
}

/// Write `payload` behind its length prefix as a single write
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(Error::Protocol(format!(
            "Message too large: {} bytes",
            payload.len()
        )));
    }
    let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reassembles length-prefixed frames from a socket with a read timeout.
///
/// Partial reads are kept across timeouts, so a message split over several
/// TCP segments is never lost when the timeout fires mid-frame.
pub struct FrameReader {
    buffer: Vec<u8>,
}

/// Initial capacity for the receive buffer (typical message size)
const INITIAL_BUFFER_CAPACITY: usize = 256;

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Next complete payload.
    ///
    /// `Ok(None)` when the read timed out before a whole frame arrived.
    /// `Err` on EOF, socket errors and oversized frames.
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(payload) = self.take_frame()? {
                return Ok(Some(payload));
            }

            let mut chunk = [0u8; 4096];
            match reader.read(&mut chunk) {
                Ok(0) => {
                    return Err(Error::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "peer closed the connection",
                    )));
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Read and decode the next message
    pub fn read_message<R: Read, T: DeserializeOwned>(
        &mut self,
        reader: &mut R,
        serializer: &Serializer,
    ) -> Result<Option<T>> {
        match self.read_frame(reader)? {
            Some(payload) => serializer.deserialize(&payload).map(Some),
            None => Ok(None),
        }
    }

    fn take_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(prefix) = self.buffer.first_chunk::<LEN_PREFIX>() else {
            return Ok(None);
        };
        let len = u32::from_be_bytes(*prefix) as usize;
        if len > MAX_MESSAGE_LEN {
            return Err(Error::Protocol(format!("Message too large: {} bytes", len)));
        }
        if self.buffer.len() < LEN_PREFIX + len {
            return Ok(None);
        }
        let payload = self.buffer[LEN_PREFIX..LEN_PREFIX + len].to_vec();
        self.buffer.drain(..LEN_PREFIX + len);
        Ok(Some(payload))
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

/// True for the errors a closed peer produces
pub fn is_disconnect(error: &Error) -> bool {
    matches!(
        error,
        Error::Io(e) if matches!(
            e.kind(),
            ErrorKind::UnexpectedEof
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{LinkState, Measurement, Unit, VersionedReading, WeightReading};
    use crate::streaming::messages::{ClientMessage, ServerMessage};
    use std::io::Cursor;

    /// Reader that hands out bytes in fixed slices, then times out
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.data.len() {
                return Err(std::io::Error::new(ErrorKind::WouldBlock, "no data"));
            }
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn update() -> ServerMessage {
        ServerMessage::Update {
            reading: VersionedReading {
                version: 7,
                reading: WeightReading::new(Measurement::new(12.5, Unit::Kg, true)),
                link: LinkState::Connected,
            },
        }
    }

    #[test]
    fn test_both_formats_carry_messages() {
        for format in [WireFormat::Json, WireFormat::Postcard] {
            let serializer = Serializer::new(format);
            let mut wire = Vec::new();
            serializer.write_message(&mut wire, &update()).unwrap();
            serializer
                .write_message(&mut wire, &ServerMessage::Pong { nonce: 3 })
                .unwrap();

            let mut reader = FrameReader::new();
            let mut cursor = Cursor::new(wire);
            let first: ServerMessage = reader
                .read_message(&mut cursor, &serializer)
                .unwrap()
                .unwrap();
            assert_eq!(first, update());
            let second: ServerMessage = reader
                .read_message(&mut cursor, &serializer)
                .unwrap()
                .unwrap();
            assert_eq!(second, ServerMessage::Pong { nonce: 3 });
        }
    }

    #[test]
    fn test_json_is_readable() {
        let serializer = Serializer::new(WireFormat::Json);
        let bytes = serializer.serialize(&ClientMessage::Ping { nonce: 9 }).unwrap();
        assert_eq!(bytes, br#"{"Ping":{"nonce":9}}"#);
    }

    #[test]
    fn test_partial_frames_survive_timeouts() {
        let serializer = Serializer::new(WireFormat::Json);
        let mut wire = Vec::new();
        serializer
            .write_message(&mut wire, &ClientMessage::Bye)
            .unwrap();

        let mut trickle = Trickle {
            data: wire,
            pos: 0,
            step: 3,
        };
        let mut reader = FrameReader::new();
        let msg: Option<ClientMessage> = reader.read_message(&mut trickle, &serializer).unwrap();
        assert_eq!(msg, Some(ClientMessage::Bye));
        let msg: Option<ClientMessage> = reader.read_message(&mut trickle, &serializer).unwrap();
        assert_eq!(msg, None);
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let mut wire = ((MAX_MESSAGE_LEN + 1) as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(b"xx");
        let mut reader = FrameReader::new();
        let err = reader.read_frame(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_eof_is_a_disconnect() {
        let mut reader = FrameReader::new();
        let err = reader.read_frame(&mut Cursor::new(vec![0u8, 0])).unwrap_err();
        assert!(is_disconnect(&err));
    }
}
