//! Parsing of the duration strings used in the configuration file.
//!
//! Accepts the compact notation used throughout the YAML schema: a sequence
//! of decimal numbers, each with an optional fraction and a unit suffix
//! (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`), e.g. `500ms`, `15s`, `1m30s`.

use std::time::Duration;

use crate::error::{Error, Result};

const UNITS: &[(&str, u64)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60_000_000_000),
    ("h", 3_600_000_000_000),
];

/// Parses a duration such as `"1m30s"`.
///
/// A bare `"0"` is accepted; any other number needs a unit.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || Error::config(format!("invalid duration {input:?}"));
    let mut rest = input.trim();
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u64 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid());
        }
        let number = &rest[..number_len];
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(invalid)?;
        rest = &rest[unit_len..];

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let mut nanos = whole.checked_mul(scale).ok_or_else(invalid)?;
        if !fraction.is_empty() {
            let fraction: f64 = format!("0.{fraction}").parse().map_err(|_| invalid())?;
            nanos += (fraction * scale as f64).round() as u64;
        }
        total = total.checked_add(nanos).ok_or_else(invalid)?;
    }

    Ok(Duration::from_nanos(total))
}

/// Parses an optional duration field: an empty string yields `None`.
pub fn parse_optional(input: &str) -> Result<Option<Duration>> {
    if input.trim().is_empty() {
        Ok(None)
    } else {
        parse_duration(input).map(Some)
    }
}
