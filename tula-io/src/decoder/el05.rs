//! EL05 frame format.
//!
//! ```text
//! ┌────────┬──────────────────────────┬────────────┐
//! │ 'M'    │ 6-char numeric field     │ '\r'       │
//! │ 0x4D   │ [sign|digit] + 5 digits  │ terminator │
//! └────────┴──────────────────────────┴────────────┘
//! ```
//!
//! The field carries an implied decimal point: with one decimal place
//! `M000010` is 1.0 kg. A leading `-` marks a negative value, a leading
//! space or `+` a positive one. The format has no stability flag, so every
//! decoded reading is reported stable.

use super::trim_frame;
use crate::core::types::{Measurement, Unit};
use crate::error::DecodeError;

pub const HEADER: u8 = b'M';
pub const FIELD_WIDTH: usize = 6;
pub const TERMINATOR: u8 = b'\r';

pub(super) fn parse(raw: &[u8], decimals: u8) -> Result<Measurement, DecodeError> {
    let frame = trim_frame(raw);
    let Some((&header, field)) = frame.split_first() else {
        return Err(DecodeError::malformed("empty frame"));
    };
    if header != HEADER {
        return Err(DecodeError::malformed(format!(
            "expected header 0x{:02X}, got 0x{:02X}",
            HEADER, header
        )));
    }
    if field.len() != FIELD_WIDTH {
        return Err(DecodeError::malformed(format!(
            "numeric field is {} bytes, expected {}",
            field.len(),
            FIELD_WIDTH
        )));
    }

    let (negative, digits) = match field[0] {
        b'-' => (true, &field[1..]),
        b'+' | b' ' => (false, &field[1..]),
        _ => (false, field),
    };
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(DecodeError::malformed("non-digit in numeric field"));
    }

    let raw_value = digits
        .iter()
        .fold(0u32, |acc, &d| acc * 10 + u32::from(d - b'0'));
    let magnitude = f64::from(raw_value) / 10f64.powi(i32::from(decimals));
    let value = if negative { -magnitude } else { magnitude };

    Ok(Measurement::new(value, Unit::Kg, true))
}

pub(super) fn encode(measurement: &Measurement, decimals: u8) -> Vec<u8> {
    let scaled = (measurement.value_kg() * 10f64.powi(i32::from(decimals))).round() as i64;
    let field = if scaled < 0 {
        format!("-{:05}", (-scaled).min(99_999))
    } else {
        format!("{:06}", scaled.min(999_999))
    };

    let mut frame = Vec::with_capacity(FIELD_WIDTH + 2);
    frame.push(HEADER);
    frame.extend_from_slice(field.as_bytes());
    frame.push(TERMINATOR);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_frame() {
        let m = parse(b"M000010\r", 1).unwrap();
        assert_relative_eq!(m.value, 1.0);
        assert_eq!(m.unit, Unit::Kg);
        assert!(m.stable);
    }

    #[test]
    fn test_implied_decimal_places() {
        assert_relative_eq!(parse(b"M012345\r", 1).unwrap().value, 1234.5);
        assert_relative_eq!(parse(b"M012345\r", 2).unwrap().value, 123.45);
        assert_relative_eq!(parse(b"M012345\r", 3).unwrap().value, 12.345);
        assert_relative_eq!(parse(b"M012345\r", 0).unwrap().value, 12345.0);
    }

    #[test]
    fn test_sign_handling() {
        assert_relative_eq!(parse(b"M-00025\r", 1).unwrap().value, -2.5);
        assert_relative_eq!(parse(b"M 00025\r", 1).unwrap().value, 2.5);
        assert_relative_eq!(parse(b"M+00025\r", 1).unwrap().value, 2.5);
    }

    #[test]
    fn test_tolerates_framing_bytes() {
        assert_relative_eq!(parse(b"\x02M000100\r\n", 1).unwrap().value, 10.0);
        assert_relative_eq!(parse(b"\nM000100", 1).unwrap().value, 10.0);
    }

    #[test]
    fn test_malformed_frames() {
        for raw in [
            &b""[..],
            b"\r",
            b"X000010\r",
            b"M00010\r",
            b"M0000100\r",
            b"M00A010\r",
            b"M--0010\r",
            b"000010M\r",
        ] {
            let err = parse(raw, 1).unwrap_err();
            assert!(
                matches!(err, DecodeError::Malformed { .. }),
                "{:?} -> {:?}",
                raw,
                err
            );
        }
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        let m = Measurement::new(1.0, Unit::Kg, true);
        assert_eq!(encode(&m, 1), b"M000010\r");

        let m = Measurement::new(-2.5, Unit::Kg, true);
        assert_eq!(encode(&m, 1), b"M-00025\r");

        let m = Measurement::new(250.0, Unit::G, true);
        assert_eq!(encode(&m, 2), b"M000025\r");
    }

    #[test]
    fn test_encoded_frames_decode_back() {
        for kg in [0.0, 0.1, 37.4, 499.9, 1234.5] {
            let frame = encode(&Measurement::new(kg, Unit::Kg, true), 1);
            assert_relative_eq!(parse(&frame, 1).unwrap().value, kg, epsilon = 1e-9);
        }
    }
}
