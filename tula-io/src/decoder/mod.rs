//! Scale frame decoding.
//!
//! Two serial wire formats are supported:
//!
//! | Format | Terminator | Layout |
//! |--------|------------|--------|
//! | EL05   | `\r`       | `M` + 6-char fixed-width field, implied decimal point |
//! | COND   | `\n`       | `[STX][ST\|US,][GS\|NT,]±value[unit]`, `,`/space separated |
//!
//! [`decode`] never panics on garbage: every input yields a reading or a
//! typed [`DecodeError`].

pub mod cond;
pub mod el05;
pub mod framer;

pub use framer::{Framed, LineFramer};

use crate::core::types::{Measurement, WeightReading};
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};

/// Start-of-text byte some scales put in front of a frame
pub const STX: u8 = 0x02;
/// End-of-text byte some scales put after a frame
pub const ETX: u8 = 0x03;
/// Longest frame accepted before the framer gives up on a line
pub const MAX_FRAME_LEN: usize = 64;

/// Serial wire format emitted by the scale
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ScaleFormat {
    #[default]
    El05,
    Cond,
}

impl ScaleFormat {
    /// Byte that ends a frame on the wire
    pub fn terminator(self) -> u8 {
        match self {
            ScaleFormat::El05 => el05::TERMINATOR,
            ScaleFormat::Cond => cond::TERMINATOR,
        }
    }

    /// Render a measurement as this format would put it on the wire
    pub fn encode(self, measurement: &Measurement, decimals: u8) -> Vec<u8> {
        match self {
            ScaleFormat::El05 => el05::encode(measurement, decimals),
            ScaleFormat::Cond => cond::encode(measurement, decimals),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScaleFormat::El05 => "EL05",
            ScaleFormat::Cond => "COND",
        }
    }
}

impl std::fmt::Display for ScaleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Decimal convention and plausibility window for decoded values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeLimits {
    /// Implied decimal places in the EL05 numeric field (`M000010` → 1.0 with 1)
    pub el05_decimals: u8,
    /// Lowest accepted value in kg (negative tolerance around zero)
    pub min_kg: f64,
    /// Highest accepted value in kg (scale capacity)
    pub max_kg: f64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            el05_decimals: 1,
            min_kg: -5.0,
            max_kg: 3000.0,
        }
    }
}

impl DecodeLimits {
    fn check(&self, measurement: Measurement) -> Result<Measurement, DecodeError> {
        let value_kg = measurement.value_kg();
        if !value_kg.is_finite() || value_kg < self.min_kg || value_kg > self.max_kg {
            return Err(DecodeError::OutOfRange { value_kg });
        }
        Ok(measurement)
    }
}

/// Decode one raw frame into a reading stamped with the current time
pub fn decode(
    raw: &[u8],
    format: ScaleFormat,
    limits: &DecodeLimits,
) -> Result<WeightReading, DecodeError> {
    decode_measurement(raw, format, limits).map(WeightReading::new)
}

/// Decode one raw frame without stamping it
pub fn decode_measurement(
    raw: &[u8],
    format: ScaleFormat,
    limits: &DecodeLimits,
) -> Result<Measurement, DecodeError> {
    if raw.len() > MAX_FRAME_LEN {
        return Err(DecodeError::malformed(format!(
            "frame is {} bytes, limit {}",
            raw.len(),
            MAX_FRAME_LEN
        )));
    }
    let measurement = match format {
        ScaleFormat::El05 => el05::parse(raw, limits.el05_decimals)?,
        ScaleFormat::Cond => cond::parse(raw)?,
    };
    limits.check(measurement)
}

/// Strip framing bytes: leading STX/CR/LF and trailing CR/LF/ETX
pub(crate) fn trim_frame(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|&b| !matches!(b, STX | b'\r' | b'\n'))
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|&b| !matches!(b, ETX | b'\r' | b'\n'))
        .map_or(start, |i| i + 1);
    &raw[start..end.max(start)]
}

/// Space-separated uppercase hex, for trace logging of raw frames
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Unit;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_trim_frame() {
        assert_eq!(trim_frame(b"\x02M000010\r\n"), b"M000010");
        assert_eq!(trim_frame(b"\nST,1.0kg\r"), b"ST,1.0kg");
        assert_eq!(trim_frame(b"\r\n"), b"");
        assert_eq!(trim_frame(b""), b"");
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(b"M0\r"), "4D 30 0D");
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn test_decode_el05_reading() {
        let reading = decode(b"M000010\r", ScaleFormat::El05, &DecodeLimits::default()).unwrap();
        assert_relative_eq!(reading.value().unwrap(), 1.0);
        assert_eq!(reading.unit(), Some(Unit::Kg));
        assert!(reading.is_stable());
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let limits = DecodeLimits {
            max_kg: 100.0,
            ..Default::default()
        };
        let err = decode(b"M001500\r", ScaleFormat::El05, &limits).unwrap_err();
        assert_eq!(err, DecodeError::OutOfRange { value_kg: 150.0 });

        // Negative beyond tolerance
        let err = decode(b"M-00600\r", ScaleFormat::El05, &DecodeLimits::default()).unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange { .. }));
    }

    #[test]
    fn test_grams_are_range_checked_in_kg() {
        let limits = DecodeLimits {
            max_kg: 2.0,
            ..Default::default()
        };
        assert!(decode(b"1500g\r\n", ScaleFormat::Cond, &limits).is_ok());
        assert!(decode(b"2500g\r\n", ScaleFormat::Cond, &limits).is_err());
    }

    #[test]
    fn test_oversized_frame_is_malformed() {
        let raw = vec![b'1'; MAX_FRAME_LEN + 1];
        let err = decode(&raw, ScaleFormat::Cond, &DecodeLimits::default()).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn test_garbage_never_escapes_typed_result() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let limits = DecodeLimits::default();
        // Biased alphabet so some inputs get past the header checks
        let alphabet = b"M0123456789-+. ,kgKGSTUSNOL\r\n\x02\x03\xff";

        for _ in 0..5000 {
            let len = rng.gen_range(0..=MAX_FRAME_LEN);
            let raw: Vec<u8> = (0..len)
                .map(|_| {
                    if rng.gen_bool(0.8) {
                        alphabet[rng.gen_range(0..alphabet.len())]
                    } else {
                        rng.r#gen::<u8>()
                    }
                })
                .collect();

            for format in [ScaleFormat::El05, ScaleFormat::Cond] {
                match decode(&raw, format, &limits) {
                    Ok(reading) => assert!(!reading.is_stale()),
                    Err(DecodeError::Malformed { .. }) | Err(DecodeError::OutOfRange { .. }) => {}
                }
            }
        }
    }

    #[test]
    fn test_format_terminators() {
        assert_eq!(ScaleFormat::El05.terminator(), b'\r');
        assert_eq!(ScaleFormat::Cond.terminator(), b'\n');
    }
}
