//! Tabular layouts: delimiter, time encoding, preamble and column mapping.
//!
//! Two presets cover the files this tool is used with. CryptoDataDownload
//! files start with a URL line and name their columns loosely
//! (`unix`/`unix timestamp`, `Volume BTC`); CryptoTick exports are
//! semicolon-separated with fixed column names.

use super::ingest::IngestError;
use super::timestamp::TimestampFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a column is located in the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnMatcher {
    /// Header equals the name, ignoring case.
    Name(String),
    /// Header starts with the prefix, ignoring case. The first match wins.
    Prefix(String),
    /// 0-based position, regardless of the header.
    Position(usize),
}

impl ColumnMatcher {
    pub fn name(name: &str) -> Self {
        ColumnMatcher::Name(name.to_string())
    }

    pub fn prefix(prefix: &str) -> Self {
        ColumnMatcher::Prefix(prefix.to_string())
    }

    fn find(&self, headers: &csv::StringRecord) -> Option<usize> {
        match self {
            ColumnMatcher::Name(name) => headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name)),
            ColumnMatcher::Prefix(prefix) => headers.iter().position(|h| {
                h.trim()
                    .get(..prefix.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            }),
            ColumnMatcher::Position(index) => (*index < headers.len()).then_some(*index),
        }
    }
}

impl fmt::Display for ColumnMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnMatcher::Name(name) => write!(f, "column named '{name}'"),
            ColumnMatcher::Prefix(prefix) => write!(f, "column starting with '{prefix}'"),
            ColumnMatcher::Position(index) => write!(f, "column #{index}"),
        }
    }
}

/// Which column holds each field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub time: ColumnMatcher,
    pub symbol: ColumnMatcher,
    pub open: ColumnMatcher,
    pub high: ColumnMatcher,
    pub low: ColumnMatcher,
    pub close: ColumnMatcher,
    pub volume: ColumnMatcher,
}

/// Column positions resolved against a header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnIndices {
    pub time: usize,
    pub symbol: usize,
    pub open: usize,
    pub high: usize,
    pub low: usize,
    pub close: usize,
    pub volume: usize,
}

impl ColumnIndices {
    /// Smallest row length that holds every column.
    pub fn required_len(&self) -> usize {
        [self.time, self.symbol, self.open, self.high, self.low, self.close, self.volume]
            .into_iter()
            .max()
            .map_or(0, |max| max + 1)
    }
}

impl ColumnSpec {
    pub fn resolve(&self, headers: &csv::StringRecord) -> Result<ColumnIndices, IngestError> {
        let find = |field: &'static str, matcher: &ColumnMatcher| {
            matcher.find(headers).ok_or_else(|| IngestError::MissingColumn {
                field,
                matcher: matcher.to_string(),
            })
        };
        Ok(ColumnIndices {
            time: find("time", &self.time)?,
            symbol: find("symbol", &self.symbol)?,
            open: find("open", &self.open)?,
            high: find("high", &self.high)?,
            low: find("low", &self.low)?,
            close: find("close", &self.close)?,
            volume: find("volume", &self.volume)?,
        })
    }
}

/// Everything needed to read one kind of delimited file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabularLayout {
    pub delimiter: u8,
    pub timestamp: TimestampFormat,
    /// Lines before the header row.
    pub skip_rows: usize,
    pub columns: ColumnSpec,
}

impl TabularLayout {
    pub fn crypto_data_download() -> Self {
        Self {
            delimiter: b',',
            timestamp: TimestampFormat::UnixEpoch,
            skip_rows: 1,
            columns: ColumnSpec {
                time: ColumnMatcher::prefix("unix"),
                symbol: ColumnMatcher::name("symbol"),
                open: ColumnMatcher::name("open"),
                high: ColumnMatcher::name("high"),
                low: ColumnMatcher::name("low"),
                close: ColumnMatcher::name("close"),
                volume: ColumnMatcher::prefix("volume"),
            },
        }
    }

    pub fn crypto_tick() -> Self {
        Self {
            delimiter: b';',
            timestamp: TimestampFormat::Iso8601,
            skip_rows: 0,
            columns: ColumnSpec {
                time: ColumnMatcher::name("time_period_start"),
                symbol: ColumnMatcher::name("symbol_id"),
                open: ColumnMatcher::name("px_open"),
                high: ColumnMatcher::name("px_high"),
                low: ColumnMatcher::name("px_low"),
                close: ColumnMatcher::name("px_close"),
                volume: ColumnMatcher::name("sx_sum"),
            },
        }
    }
}

/// Named layouts selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutPreset {
    CryptoDataDownload,
    CryptoTick,
}

impl LayoutPreset {
    pub fn layout(self) -> TabularLayout {
        match self {
            LayoutPreset::CryptoDataDownload => TabularLayout::crypto_data_download(),
            LayoutPreset::CryptoTick => TabularLayout::crypto_tick(),
        }
    }
}

impl FromStr for LayoutPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "cryptodatadownload" | "cdd" => Ok(LayoutPreset::CryptoDataDownload),
            "cryptotick" => Ok(LayoutPreset::CryptoTick),
            _ => Err(format!(
                "unknown layout '{s}' (expected crypto-data-download or crypto-tick)"
            )),
        }
    }
}

/// CryptoDataDownload files announce themselves in their first line.
pub fn detect_layout(first_line: &str) -> TabularLayout {
    if first_line.to_ascii_lowercase().contains("cryptodatadownload") {
        TabularLayout::crypto_data_download()
    } else {
        TabularLayout::crypto_tick()
    }
}
