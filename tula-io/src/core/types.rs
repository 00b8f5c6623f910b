//! Core data types for weight readings and link state.
//!
//! Key types:
//! - [`WeightReading`]: one decoded (or stale) reading, immutable after creation
//! - [`VersionedReading`]: what the hub publishes, a reading plus version and link state
//! - [`LinkState`]: health of the serial link behind a published reading

use serde::{Deserialize, Serialize};

/// Unit reported by the scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Kg,
    G,
}

impl Unit {
    /// Factor that converts a value in this unit to kilograms
    #[inline]
    pub fn to_kg_factor(self) -> f64 {
        match self {
            Unit::Kg => 1.0,
            Unit::G => 0.001,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Kg => "kg",
            Unit::G => "g",
        }
    }
}

/// Decoded weight value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Signed value in `unit`
    pub value: f64,
    pub unit: Unit,
    /// Scale reported a settled reading
    pub stable: bool,
}

impl Measurement {
    pub fn new(value: f64, unit: Unit, stable: bool) -> Self {
        Self {
            value,
            unit,
            stable,
        }
    }

    /// Value converted to kilograms
    #[inline]
    pub fn value_kg(&self) -> f64 {
        self.value * self.unit.to_kg_factor()
    }
}

/// A weight reading.
///
/// Either fully populated (`measurement` is `Some`) or stale (`None`), never
/// anything in between. Stale readings are emitted when the scale goes silent
/// so consumers never show a frozen value as live.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightReading {
    pub measurement: Option<Measurement>,
    /// Timestamp in microseconds since epoch
    pub timestamp_us: u64,
}

impl WeightReading {
    /// Reading stamped with the current time
    pub fn new(measurement: Measurement) -> Self {
        Self {
            measurement: Some(measurement),
            timestamp_us: now_us(),
        }
    }

    /// Synthetic reading signalling "no valid data"
    pub fn stale() -> Self {
        Self {
            measurement: None,
            timestamp_us: now_us(),
        }
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.measurement.is_none()
    }

    pub fn value(&self) -> Option<f64> {
        self.measurement.map(|m| m.value)
    }

    pub fn unit(&self) -> Option<Unit> {
        self.measurement.map(|m| m.unit)
    }

    /// Stale readings are never stable
    pub fn is_stable(&self) -> bool {
        self.measurement.is_some_and(|m| m.stable)
    }

    pub fn value_kg(&self) -> Option<f64> {
        self.measurement.map(|m| m.value_kg())
    }
}

impl std::fmt::Display for WeightReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.measurement {
            Some(m) if m.stable => write!(f, "{:.2} {}", m.value, m.unit.symbol()),
            Some(m) => write!(f, "{:.2} {} (unstable)", m.value, m.unit.symbol()),
            None => write!(f, "-- (no data)"),
        }
    }
}

/// Health of the serial link at the time a version was published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Frames decode normally
    Connected,
    /// Line is delivering undecodable frames
    Degraded,
    /// Device handle lost, reconnecting
    Disconnected,
}

/// Reading as published by the hub
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VersionedReading {
    /// Strictly increasing per hub; 0 is the initial empty snapshot
    pub version: u64,
    pub reading: WeightReading,
    pub link: LinkState,
}

impl VersionedReading {
    /// Snapshot held before anything has been published
    pub fn initial() -> Self {
        Self {
            version: 0,
            reading: WeightReading::stale(),
            link: LinkState::Disconnected,
        }
    }

    /// A live value a viewer can trust
    pub fn is_live(&self) -> bool {
        self.link != LinkState::Disconnected && !self.reading.is_stale()
    }
}

/// Current time in microseconds since epoch
pub fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
