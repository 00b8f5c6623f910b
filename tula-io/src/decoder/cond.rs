//! COND frame format.
//!
//! Field-separated ASCII line, optionally wrapped in STX/ETX:
//!
//! ```text
//! [STX] [ST|US|OL] [GS|G|NT|N] [+|-]digits[.digits][unit] CR LF
//! ```
//!
//! Fields are separated by `,` or whitespace and may appear in any order.
//! Exactly one numeric field is required. The unit is `kg`/`k` (any case) or
//! `g`, either glued to the number or as its own field; kg is assumed when
//! absent. `ST` and `US` mark stable/unstable readings (stable when absent),
//! `OL` reports an overload. A lone `+`/`-` field signs the number after it.

use super::trim_frame;
use crate::core::types::{Measurement, Unit};
use crate::error::DecodeError;

pub const TERMINATOR: u8 = b'\n';

pub(super) fn parse(raw: &[u8]) -> Result<Measurement, DecodeError> {
    let frame = trim_frame(raw);
    if frame.is_empty() {
        return Err(DecodeError::malformed("empty frame"));
    }
    let text = std::str::from_utf8(frame)
        .ok()
        .filter(|s| s.is_ascii())
        .ok_or_else(|| DecodeError::malformed("non-ASCII bytes in frame"))?;

    let mut stable: Option<bool> = None;
    let mut unit: Option<Unit> = None;
    let mut value: Option<f64> = None;
    let mut pending_sign: Option<f64> = None;

    let fields = text
        .split(|c: char| c == ',' || c.is_ascii_whitespace())
        .filter(|f| !f.is_empty());

    for field in fields {
        match field {
            "ST" => set_once(&mut stable, true, "stability")?,
            "US" => set_once(&mut stable, false, "stability")?,
            "OL" => {
                return Err(DecodeError::OutOfRange {
                    value_kg: f64::INFINITY,
                });
            }
            // Gross/net marker carries no information the reading needs
            "GS" | "G" | "NT" | "N" => {}
            "-" | "+" => {
                if pending_sign.is_some() {
                    return Err(DecodeError::malformed("repeated sign field"));
                }
                pending_sign = Some(if field == "-" { -1.0 } else { 1.0 });
            }
            _ => {
                if let Some(u) = parse_unit(field) {
                    set_once(&mut unit, u, "unit")?;
                    continue;
                }

                let (number, suffix) = split_number(field);
                if !number.bytes().any(|b| b.is_ascii_digit()) {
                    return Err(DecodeError::malformed(format!(
                        "unexpected field '{}'",
                        field
                    )));
                }
                let parsed: f64 = number
                    .parse()
                    .map_err(|_| DecodeError::malformed(format!("bad number '{}'", number)))?;
                let sign = pending_sign.take().unwrap_or(1.0);
                set_once(&mut value, parsed * sign, "numeric")?;

                if !suffix.is_empty() {
                    let u = parse_unit(suffix).ok_or_else(|| {
                        DecodeError::malformed(format!("unknown unit '{}'", suffix))
                    })?;
                    set_once(&mut unit, u, "unit")?;
                }
            }
        }
    }

    if pending_sign.is_some() {
        return Err(DecodeError::malformed("sign without a number"));
    }
    let value = value.ok_or_else(|| DecodeError::malformed("no numeric field"))?;

    Ok(Measurement::new(
        value,
        unit.unwrap_or(Unit::Kg),
        stable.unwrap_or(true),
    ))
}

fn set_once<T>(slot: &mut Option<T>, value: T, what: &str) -> Result<(), DecodeError> {
    if slot.is_some() {
        return Err(DecodeError::malformed(format!("more than one {} field", what)));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_unit(field: &str) -> Option<Unit> {
    if field.eq_ignore_ascii_case("kg") || field.eq_ignore_ascii_case("k") {
        Some(Unit::Kg)
    } else if field == "g" {
        Some(Unit::G)
    } else {
        None
    }
}

/// Split `"+0012.34kg"` into `("+0012.34", "kg")`
fn split_number(field: &str) -> (&str, &str) {
    let mut seen_dot = false;
    let end = field
        .char_indices()
        .find(|&(i, c)| match c {
            '+' | '-' => i != 0,
            '.' if !seen_dot => {
                seen_dot = true;
                false
            }
            c => !c.is_ascii_digit(),
        })
        .map_or(field.len(), |(i, _)| i);
    field.split_at(end)
}

pub(super) fn encode(measurement: &Measurement, decimals: u8) -> Vec<u8> {
    let status = if measurement.stable { "ST" } else { "US" };
    let width = usize::from(decimals) + 6;
    format!(
        "{},GS,{:+0width$.prec$}{}\r\n",
        status,
        measurement.value,
        measurement.unit.symbol(),
        width = width,
        prec = usize::from(decimals)
    )
    .into_bytes()
}
