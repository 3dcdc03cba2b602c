//! Interval calendar: parsing, formatting and calendar-aware stepping.
//!
//! An interval is a positive length of one denomination, written as
//! `<length><code>` (`15MIN`, `1DAY`). Parsing also accepts single-character
//! and full-word denominations (`15m`, `1 Day` without the space, `2Months`).
//!
//! Seconds through days step by fixed durations. Months and years step by
//! calendar months, clamping to the last day of shorter months.

use chrono::{Duration, Months, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntervalError {
    #[error("interval '{0}' must start with a positive integer length")]
    MissingLength(String),

    #[error("interval length must be greater than zero")]
    ZeroLength,

    #[error("interval length in '{0}' is too large")]
    LengthOverflow(String),

    #[error("unknown interval denomination '{denomination}' in '{input}'")]
    UnknownDenomination { input: String, denomination: String },

    #[error("malformed interval denomination '{denomination}'. Did you mean {suggestion}?")]
    Misspelled {
        denomination: String,
        suggestion: &'static str,
    },

    #[error("stepping {steps} x {interval} from {from} leaves the representable calendar")]
    Overflow {
        interval: Interval,
        from: NaiveDateTime,
        steps: i64,
    },
}

/// Unit of an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Denomination {
    Seconds,
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

impl Denomination {
    pub const ALL: [Denomination; 6] = [
        Denomination::Seconds,
        Denomination::Minutes,
        Denomination::Hours,
        Denomination::Days,
        Denomination::Months,
        Denomination::Years,
    ];

    /// Three-letter code used in the canonical notation.
    pub fn code(self) -> &'static str {
        match self {
            Denomination::Seconds => "SEC",
            Denomination::Minutes => "MIN",
            Denomination::Hours => "HRS",
            Denomination::Days => "DAY",
            Denomination::Months => "MTH",
            Denomination::Years => "YRS",
        }
    }

    /// Singular English name ("Second", "Minute", ...).
    pub fn unit_name(self) -> &'static str {
        match self {
            Denomination::Seconds => "Second",
            Denomination::Minutes => "Minute",
            Denomination::Hours => "Hour",
            Denomination::Days => "Day",
            Denomination::Months => "Month",
            Denomination::Years => "Year",
        }
    }

    fn plural_name(self) -> &'static str {
        match self {
            Denomination::Seconds => "Seconds",
            Denomination::Minutes => "Minutes",
            Denomination::Hours => "Hours",
            Denomination::Days => "Days",
            Denomination::Months => "Months",
            Denomination::Years => "Years",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.code().eq_ignore_ascii_case(code))
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            's' | 'S' => Some(Denomination::Seconds),
            'm' => Some(Denomination::Minutes),
            'h' | 'H' => Some(Denomination::Hours),
            'd' | 'D' => Some(Denomination::Days),
            'M' => Some(Denomination::Months),
            'y' | 'Y' => Some(Denomination::Years),
            _ => None,
        }
    }

    /// Full-word form: the singular name, optionally followed by `s`.
    fn from_word(word: &str, input: &str) -> Result<Self, IntervalError> {
        for denomination in Self::ALL {
            let name = denomination.unit_name();
            let Some(prefix) = word.get(..name.len()) else {
                continue;
            };
            if !prefix.eq_ignore_ascii_case(name) {
                continue;
            }
            let rest = &word[name.len()..];
            if rest.is_empty() || rest.eq_ignore_ascii_case("s") {
                return Ok(denomination);
            }
            return Err(IntervalError::Misspelled {
                denomination: word.to_string(),
                suggestion: denomination.plural_name(),
            });
        }
        Err(IntervalError::UnknownDenomination {
            input: input.to_string(),
            denomination: word.to_string(),
        })
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A positive length of one denomination.
///
/// Ordered by denomination first, then length, so flows of one symbol list
/// from finest to coarsest unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInterval", into = "RawInterval")]
pub struct Interval {
    denomination: Denomination,
    length: u32,
}

#[derive(Serialize, Deserialize)]
struct RawInterval {
    denomination: Denomination,
    length: u32,
}

impl TryFrom<RawInterval> for Interval {
    type Error = IntervalError;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        Interval::new(raw.length, raw.denomination)
    }
}

impl From<Interval> for RawInterval {
    fn from(interval: Interval) -> Self {
        RawInterval {
            denomination: interval.denomination,
            length: interval.length,
        }
    }
}

impl Interval {
    pub fn new(length: u32, denomination: Denomination) -> Result<Self, IntervalError> {
        if length == 0 {
            return Err(IntervalError::ZeroLength);
        }
        Ok(Self {
            denomination,
            length,
        })
    }

    pub fn seconds(length: u32) -> Result<Self, IntervalError> {
        Self::new(length, Denomination::Seconds)
    }

    pub fn minutes(length: u32) -> Result<Self, IntervalError> {
        Self::new(length, Denomination::Minutes)
    }

    pub fn hours(length: u32) -> Result<Self, IntervalError> {
        Self::new(length, Denomination::Hours)
    }

    pub fn days(length: u32) -> Result<Self, IntervalError> {
        Self::new(length, Denomination::Days)
    }

    pub fn months(length: u32) -> Result<Self, IntervalError> {
        Self::new(length, Denomination::Months)
    }

    pub fn years(length: u32) -> Result<Self, IntervalError> {
        Self::new(length, Denomination::Years)
    }

    pub fn denomination(&self) -> Denomination {
        self.denomination
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Canonical notation, e.g. `15MIN`. Inverse of [`parse_interval`].
    pub fn notation(&self) -> String {
        format!("{}{}", self.length, self.denomination.code())
    }

    /// Human-readable form, e.g. `15 Minutes`.
    pub fn describe(&self) -> String {
        if self.length == 1 {
            format!("1 {}", self.denomination.unit_name())
        } else {
            format!("{} {}", self.length, self.denomination.plural_name())
        }
    }

    /// Move `steps` intervals forward (or backward when negative).
    ///
    /// Returns `None` when the result leaves chrono's representable range.
    pub fn advance(&self, from: NaiveDateTime, steps: i64) -> Option<NaiveDateTime> {
        let units = i64::from(self.length).checked_mul(steps)?;
        match self.denomination {
            Denomination::Seconds => from.checked_add_signed(Duration::try_seconds(units)?),
            Denomination::Minutes => from.checked_add_signed(Duration::try_minutes(units)?),
            Denomination::Hours => from.checked_add_signed(Duration::try_hours(units)?),
            Denomination::Days => from.checked_add_signed(Duration::try_days(units)?),
            Denomination::Months => add_months(from, units),
            Denomination::Years => add_months(from, units.checked_mul(12)?),
        }
    }

    /// The tick immediately after `from`.
    pub fn next_after(&self, from: NaiveDateTime) -> Result<NaiveDateTime, IntervalError> {
        self.step(from, 1)
    }

    /// The tick immediately before `from`.
    pub fn previous_before(&self, from: NaiveDateTime) -> Result<NaiveDateTime, IntervalError> {
        self.step(from, -1)
    }

    /// Like [`Interval::advance`], reporting overflow as an error.
    pub fn step(&self, from: NaiveDateTime, steps: i64) -> Result<NaiveDateTime, IntervalError> {
        self.advance(from, steps).ok_or(IntervalError::Overflow {
            interval: *self,
            from,
            steps,
        })
    }
}

fn add_months(from: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        from.checked_add_months(magnitude)
    } else {
        from.checked_sub_months(magnitude)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.length, self.denomination.code())
    }
}

impl FromStr for Interval {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_interval(s)
    }
}

/// Parse interval notation: leading digits, then a denomination.
///
/// Accepted denominations:
/// - three-letter codes `SEC MIN HRS DAY MTH YRS`, case-insensitive
/// - single characters `s m h d M y` (`m` is minutes, `M` is months;
///   `S H D Y` are also accepted)
/// - full words `Second(s)` through `Year(s)`, case-insensitive
pub fn parse_interval(input: &str) -> Result<Interval, IntervalError> {
    let trimmed = input.trim();
    let digits = trimmed
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(trimmed.len(), |(i, _)| i);
    if digits == 0 {
        return Err(IntervalError::MissingLength(input.to_string()));
    }

    let length: u32 = trimmed[..digits]
        .parse()
        .map_err(|_| IntervalError::LengthOverflow(input.to_string()))?;
    let word = &trimmed[digits..];

    let mut chars = word.chars();
    let denomination = match (chars.next(), chars.next()) {
        (None, _) => {
            return Err(IntervalError::UnknownDenomination {
                input: input.to_string(),
                denomination: String::new(),
            })
        }
        (Some(c), None) => {
            Denomination::from_char(c).ok_or_else(|| IntervalError::UnknownDenomination {
                input: input.to_string(),
                denomination: word.to_string(),
            })?
        }
        _ if word.len() == 3 => match Denomination::from_code(word) {
            Some(d) => d,
            None => Denomination::from_word(word, input)?,
        },
        _ => Denomination::from_word(word, input)?,
    };

    Interval::new(length, denomination)
}
