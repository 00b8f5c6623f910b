//! tula-io - scale reader and weight hub
//!
//! Reads a serial scale (EL05 or COND frames), keeps one authoritative
//! current reading and shares it with any number of viewers over TCP.
//!
//! ## Layers
//!
//! - [`decoder`]: raw frame bytes to [`WeightReading`]
//! - [`transport`]: serial port, mock and simulated byte sources
//! - [`stream`]: self-healing [`ReadingStream`] over a transport
//! - [`hub`]: [`ServerHub`] / [`ClientHub`] fan-out behind [`WeightSource`]
//! - [`tare`]: net weight from gross reading and packaging

pub mod config;
pub mod core;
pub mod decoder;
pub mod error;
pub mod hub;
pub mod stream;
pub mod streaming;
pub mod tare;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use core::types::{LinkState, Measurement, Unit, VersionedReading, WeightReading};
pub use decoder::{DecodeLimits, ScaleFormat, decode};
pub use error::{AuthError, CalculationError, DecodeError, Error, LinkError, Result};
pub use hub::{ClientHub, HubConfig, ServerHub, WeightSource};
pub use stream::{ReadingStream, StreamConfig};
pub use tare::{NetMode, NetResult, TareConfiguration, net};
