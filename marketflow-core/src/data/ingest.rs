//! Ingestion of delimited OHLCV files.
//!
//! [`IngestReader`] is a lazy iterator over the rows of one file. It skips
//! the preamble, resolves the columns against the header, and applies the
//! symbol filter, time window and entry limit while reading. [`ingest_into`]
//! feeds the rows of one symbol through the merge engine.

use super::layout::{detect_layout, ColumnIndices, TabularLayout};
use super::timestamp::{TimestampError, TimestampFormat};
use crate::domain::{Dataset, Interval, MarketInstant, TimeRange};
use crate::merge::{covering_bounds, MergeEngine, MergeError, MergeRequest, SymbolKey};
use chrono::NaiveDateTime;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed delimited data: {0}")]
    Csv(#[from] csv::Error),

    #[error("no {matcher} for the {field} field")]
    MissingColumn { field: &'static str, matcher: String },

    #[error("line {line}: expected at least {expected} fields, found {found}")]
    ShortRow {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: {field} value '{value}' is not a finite number")]
    Number {
        line: u64,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: {source}")]
    Timestamp {
        line: u64,
        #[source]
        source: TimestampError,
    },

    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// One row of an ingested file.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestRow {
    pub time: NaiveDateTime,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<IngestRow> for MarketInstant {
    fn from(row: IngestRow) -> Self {
        MarketInstant::new(row.time, row.open, row.high, row.low, row.close, row.volume)
    }
}

/// Row selection applied while reading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestFilter {
    /// Only rows whose symbol equals this, ignoring case.
    pub symbol: Option<String>,
    /// Only rows inside this inclusive window.
    pub range: Option<TimeRange>,
    /// Stop after this many accepted rows.
    pub limit: Option<usize>,
}

impl IngestFilter {
    fn accepts(&self, symbol: &str, time: NaiveDateTime) -> bool {
        self.symbol
            .as_deref()
            .map_or(true, |wanted| wanted.eq_ignore_ascii_case(symbol))
            && self.range.map_or(true, |range| range.contains(time))
    }
}

/// Lazy reader of [`IngestRow`]s from one delimited stream.
pub struct IngestReader<R: Read> {
    records: csv::StringRecordsIntoIter<BufReader<R>>,
    columns: ColumnIndices,
    timestamp: TimestampFormat,
    line_offset: u64,
    filter: IngestFilter,
    accepted: usize,
}

impl<R: Read> IngestReader<R> {
    pub fn new(reader: R, layout: &TabularLayout, filter: IngestFilter) -> Result<Self, IngestError> {
        let mut buffered = BufReader::new(reader);
        let mut discarded = String::new();
        for _ in 0..layout.skip_rows {
            discarded.clear();
            if buffered.read_line(&mut discarded)? == 0 {
                break;
            }
        }

        let mut csv = csv::ReaderBuilder::new()
            .delimiter(layout.delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(buffered);
        let columns = layout.columns.resolve(csv.headers()?)?;

        Ok(Self {
            records: csv.into_records(),
            columns,
            timestamp: layout.timestamp,
            line_offset: layout.skip_rows as u64,
            filter,
            accepted: 0,
        })
    }

    fn parse(&self, record: &csv::StringRecord) -> Result<IngestRow, IngestError> {
        let line = record.position().map_or(0, |p| p.line()) + self.line_offset;
        let expected = self.columns.required_len();
        if record.len() < expected {
            return Err(IngestError::ShortRow {
                line,
                expected,
                found: record.len(),
            });
        }

        let field = |index: usize| record.get(index).unwrap_or_default();
        let number = |name: &'static str, index: usize| {
            let raw = field(index);
            raw.parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| IngestError::Number {
                    line,
                    field: name,
                    value: raw.to_string(),
                })
        };

        Ok(IngestRow {
            time: self
                .timestamp
                .parse(field(self.columns.time))
                .map_err(|source| IngestError::Timestamp { line, source })?,
            symbol: field(self.columns.symbol).to_string(),
            open: number("open", self.columns.open)?,
            high: number("high", self.columns.high)?,
            low: number("low", self.columns.low)?,
            close: number("close", self.columns.close)?,
            volume: number("volume", self.columns.volume)?,
        })
    }
}

impl IngestReader<File> {
    /// Open a file, detecting the layout from its first line when none is
    /// given.
    pub fn open(
        path: &Path,
        layout: Option<&TabularLayout>,
        filter: IngestFilter,
    ) -> Result<Self, IngestError> {
        let open = || {
            File::open(path).map_err(|source| IngestError::Open {
                path: path.to_path_buf(),
                source,
            })
        };
        let detected;
        let layout = match layout {
            Some(layout) => layout,
            None => {
                let mut first_line = String::new();
                BufReader::new(open()?).read_line(&mut first_line)?;
                detected = detect_layout(&first_line);
                &detected
            }
        };
        Self::new(open()?, layout, filter)
    }
}

impl<R: Read> Iterator for IngestReader<R> {
    type Item = Result<IngestRow, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.filter.limit.is_some_and(|limit| self.accepted >= limit) {
                return None;
            }
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e.into())),
            };
            // Blank lines come through as a single empty field.
            if record.iter().all(str::is_empty) {
                continue;
            }
            let row = match self.parse(&record) {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            if self.filter.accepts(&row.symbol, row.time) {
                self.accepted += 1;
                return Some(Ok(row));
            }
        }
    }
}

/// Where ingested rows go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestTarget {
    /// Dataset names for the symbol.
    pub key: SymbolKey,
    pub interval: Interval,
    /// Symbol as written in the file; rows for other symbols are skipped.
    /// `None` takes every row.
    pub file_symbol: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub points_merged: usize,
}

/// Merge the target symbol's rows into `base` in one all-or-nothing merge.
///
/// The flow's declared bounds are only stretched if it already has them.
pub fn ingest_into<I>(
    base: &Dataset,
    rows: I,
    target: &IngestTarget,
    engine: &MergeEngine<'_>,
) -> Result<(Dataset, IngestSummary), IngestError>
where
    I: IntoIterator<Item = Result<IngestRow, IngestError>>,
{
    let mut summary = IngestSummary::default();
    let mut points = Vec::new();
    for row in rows {
        let row = row?;
        summary.rows_read += 1;
        let wanted = target
            .file_symbol
            .as_deref()
            .map_or(true, |symbol| symbol.eq_ignore_ascii_case(&row.symbol));
        if wanted {
            points.push(MarketInstant::from(row));
        } else {
            summary.rows_skipped += 1;
        }
    }
    summary.points_merged = points.len();

    let existing = base.flow_by_name(&target.key.symbol, target.interval);
    let (start, end) = covering_bounds(existing, None, None, &points);
    let request = MergeRequest::new(target.key.clone(), target.interval, points).declaring(start, end);
    let dataset = engine.merge(base, request)?;

    engine.diagnostics().status(&format!(
        "Ingested {} of {} rows into {} {}",
        summary.points_merged, summary.rows_read, target.key.symbol, target.interval
    ));
    Ok((dataset, summary))
}
