//! Terminator-based framing of the serial byte stream.
//!
//! Bytes arrive in arbitrary chunks; the framer accumulates them and cuts a
//! frame at each terminator byte. Lines longer than the limit are discarded
//! as a whole so one lost terminator cannot wedge the buffer.

use super::{ETX, STX};

/// Framer output
#[derive(Debug, Clone, PartialEq)]
pub enum Framed {
    /// Complete frame, terminator excluded
    Frame(Vec<u8>),
    /// Bytes dropped because no terminator arrived within the length limit
    Overflow(usize),
}

/// Accumulates serial bytes and yields terminator-delimited frames
pub struct LineFramer {
    buffer: Vec<u8>,
    terminator: u8,
    max_len: usize,
}

impl LineFramer {
    pub fn new(terminator: u8, max_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_len * 2),
            terminator,
            max_len,
        }
    }

    /// Append bytes read from the device
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete frame, if any. Call until `None` after each `push`.
    pub fn next_frame(&mut self) -> Option<Framed> {
        loop {
            let Some(end) = self.buffer.iter().position(|&b| b == self.terminator) else {
                if self.buffer.len() > self.max_len {
                    let dropped = self.buffer.len();
                    self.buffer.clear();
                    return Some(Framed::Overflow(dropped));
                }
                return None;
            };

            let frame: Vec<u8> = self.buffer.drain(..=end).take(end).collect();
            if frame.len() > self.max_len {
                return Some(Framed::Overflow(frame.len()));
            }
            // Blank lines between frames (e.g. the LF after a CR terminator)
            if frame
                .iter()
                .all(|&b| b.is_ascii_whitespace() || b == STX || b == ETX)
            {
                continue;
            }
            return Some(Framed::Frame(frame));
        }
    }

    /// Drop any partial frame, e.g. after the device reconnects
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
