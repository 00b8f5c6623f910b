//! Core types and the shared reading cell.
//!
//! - [`types`]: readings, units, link state
//! - [`cell`]: single-writer versioned cell with ordered fan-out

pub mod cell;
pub mod types;

pub use cell::{CellReader, CellWriter, ReadingCell, Subscription};
pub use types::{LinkState, Measurement, Unit, VersionedReading, WeightReading};
