//! Timestamp parsing for ingested rows and user input.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Epoch values below this are seconds.
const SECONDS_CEILING: u64 = 10_000_000_000;
/// Epoch values below this (and not seconds) are milliseconds.
const MILLIS_CEILING: u64 = 10_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("'{0}' is not a Unix epoch number")]
    NotANumber(String),

    #[error("epoch value {0} is neither seconds nor milliseconds")]
    OutOfRange(i64),

    #[error("'{0}' is not an ISO-8601 date-time")]
    NotIso(String),
}

/// How a column encodes time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFormat {
    /// Seconds or milliseconds since 1970-01-01, told apart by magnitude.
    UnixEpoch,
    /// `YYYY-MM-DDTHH:MM:SS[.fff][Z]`.
    Iso8601,
}

impl TimestampFormat {
    pub fn parse(self, raw: &str) -> Result<NaiveDateTime, TimestampError> {
        match self {
            TimestampFormat::UnixEpoch => parse_epoch(raw),
            TimestampFormat::Iso8601 => parse_iso(raw),
        }
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampFormat::UnixEpoch => f.write_str("unix"),
            TimestampFormat::Iso8601 => f.write_str("iso8601"),
        }
    }
}

impl FromStr for TimestampFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unix" | "epoch" | "unix-epoch" => Ok(TimestampFormat::UnixEpoch),
            "iso" | "iso8601" | "iso-8601" => Ok(TimestampFormat::Iso8601),
            other => Err(format!("unknown timestamp format '{other}' (expected unix or iso8601)")),
        }
    }
}

fn parse_epoch(raw: &str) -> Result<NaiveDateTime, TimestampError> {
    let trimmed = raw.trim();
    let value: i64 = match trimmed.parse::<i64>() {
        Ok(v) => v,
        // Some exports write epoch values as floats ("1609459200.0").
        Err(_) => trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v.trunc() as i64)
            .ok_or_else(|| TimestampError::NotANumber(raw.to_string()))?,
    };

    let magnitude = value.unsigned_abs();
    let parsed = if magnitude < SECONDS_CEILING {
        DateTime::from_timestamp(value, 0)
    } else if magnitude < MILLIS_CEILING {
        DateTime::from_timestamp_millis(value)
    } else {
        None
    };
    parsed
        .map(|dt| dt.naive_utc())
        .ok_or(TimestampError::OutOfRange(value))
}

fn parse_iso(raw: &str) -> Result<NaiveDateTime, TimestampError> {
    let trimmed = raw.trim();
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| DateTime::parse_from_rfc3339(trimmed).map(|dt| dt.naive_utc()))
        .map_err(|_| TimestampError::NotIso(raw.to_string()))
}

/// Parse a date-time typed by a user: ISO-8601 date-time, or a bare date
/// meaning midnight.
pub fn parse_user_time(raw: &str) -> Result<NaiveDateTime, TimestampError> {
    parse_iso(raw).or_else(|err| {
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .ok_or(err)
    })
}
