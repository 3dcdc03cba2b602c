//! Download/fill scheduler.
//!
//! Drives page requests against a [`MarketDataSource`] and merges each page
//! as soon as it arrives, so gap detection for the next request sees the
//! current state. Pages are strictly sequential.
//!
//! Two modes:
//! - **Append** starts at the later of the last stored point and the
//!   requested start, so the last stored point is fetched again and
//!   replaced. Later pages continue one step after the previous page. It
//!   stops on a short page, a spent entry budget or a passed requested end.
//! - **Fill** fetches the first internal gap of the flow, merges, and looks
//!   again. With no gaps left it falls through to append with what remains
//!   of the budget.
//!
//! The entry budget only decreases and is checked before every fetch. The
//! cancel token is checked before every fetch and again before the page is
//! merged; a page that arrives after cancellation is dropped.
//!
//! Each merged page stretches the flow's declared bounds over the points it
//! brought. The requested range is declared only once the whole run has
//! succeeded, so a partial dataset never claims coverage it did not fetch.

pub mod aggregate;
pub mod cancel;

pub use aggregate::{aggregate, AggregateOutcome, AggregateRequest};
pub use cancel::{CancelToken, Interruption};

use crate::data::{MarketDataSource, SourceError};
use crate::domain::{Dataset, Interval, MarketFlow, MarketInstant};
use crate::merge::{covering_bounds, MergeEngine, MergeError, MergeRequest, SymbolKey};
use crate::storage::StorageError;
use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("{symbol} {interval} from {from} to {}: {source}", show_end(.to))]
    Source {
        symbol: String,
        interval: Interval,
        from: NaiveDateTime,
        to: Option<NaiveDateTime>,
        #[source]
        source: SourceError,
    },

    #[error("could not resolve {base}/{quote} on {exchange}: {source}")]
    Resolve {
        exchange: String,
        base: String,
        quote: String,
        #[source]
        source: SourceError,
    },

    #[error("merging {symbol} {interval} failed: {source}")]
    Merge {
        symbol: String,
        interval: Interval,
        #[source]
        source: MergeError,
    },

    #[error("aggregation of {symbol} {interval} timed out")]
    TimedOut { symbol: String, interval: Interval },

    #[error("aggregation of {symbol} {interval} was cancelled")]
    Cancelled { symbol: String, interval: Interval },

    #[error("invalid aggregation request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn show_end(to: &Option<NaiveDateTime>) -> String {
    to.map_or_else(|| "the latest data".to_string(), |t| t.to_string())
}

/// How missing data is requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DownloadMode {
    #[default]
    Append,
    Fill,
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadMode::Append => f.write_str("append"),
            DownloadMode::Fill => f.write_str("fill"),
        }
    }
}

impl FromStr for DownloadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(DownloadMode::Append),
            "fill" => Ok(DownloadMode::Fill),
            other => Err(format!("unknown download mode '{other}' (expected append or fill)")),
        }
    }
}

/// One scheduled download for a single (symbol, interval) flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    /// Dataset names; `key.symbol` is also the source's symbol id.
    pub key: SymbolKey,
    pub interval: Interval,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
    /// Total entries to request across all pages.
    pub limit: usize,
    pub mode: DownloadMode,
}

/// A request sent to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRecord {
    pub from: NaiveDateTime,
    pub to: Option<NaiveDateTime>,
    pub limit: usize,
    pub received: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOutcome {
    pub dataset: Dataset,
    pub fetches: Vec<FetchRecord>,
    /// Points received across all pages.
    pub points: usize,
}

/// The first error, with everything merged before it.
#[derive(Debug)]
pub struct ScheduleFailure {
    pub error: AggregateError,
    pub partial: Dataset,
    pub fetches: Vec<FetchRecord>,
}

/// Remaining entry budget. Never increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    remaining: usize,
}

impl Budget {
    /// `limit` rounded up to a multiple of `factor`.
    pub fn rounded(limit: usize, factor: usize) -> Self {
        let factor = factor.max(1);
        Self {
            remaining: limit.div_ceil(factor).saturating_mul(factor),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub fn consume(&mut self, received: usize) {
        self.remaining = self.remaining.saturating_sub(received);
    }
}

/// Mutable state of one scheduling run.
struct Run {
    dataset: Dataset,
    budget: Budget,
    fetches: Vec<FetchRecord>,
    points: usize,
}

/// Page-by-page downloader for one flow.
pub struct Scheduler<'a> {
    source: &'a dyn MarketDataSource,
    engine: MergeEngine<'a>,
    cancel: &'a CancelToken,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        source: &'a dyn MarketDataSource,
        engine: MergeEngine<'a>,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            source,
            engine,
            cancel,
        }
    }

    /// Download into `base` until the request is satisfied.
    ///
    /// On failure the dataset as merged so far is handed back with the
    /// error; nothing from the failing page is in it.
    pub fn run(
        &self,
        base: Dataset,
        request: &ScheduleRequest,
    ) -> Result<ScheduleOutcome, ScheduleFailure> {
        let mut run = Run {
            dataset: base,
            budget: Budget::rounded(request.limit, self.source.limit_request_factor()),
            fetches: Vec::new(),
            points: 0,
        };

        match self.drive(&mut run, request) {
            Ok(()) => Ok(ScheduleOutcome {
                dataset: run.dataset,
                fetches: run.fetches,
                points: run.points,
            }),
            Err(error) => Err(ScheduleFailure {
                error,
                partial: run.dataset,
                fetches: run.fetches,
            }),
        }
    }

    fn drive(&self, run: &mut Run, request: &ScheduleRequest) -> Result<(), AggregateError> {
        if let (Some(from), Some(to)) = (request.from, request.to) {
            if from > to {
                return Err(AggregateError::InvalidRequest(format!(
                    "start {from} is after end {to}"
                )));
            }
        }
        let notation = self
            .source
            .to_source_notation(request.interval)
            .map_err(|source| AggregateError::Source {
                symbol: request.key.symbol.clone(),
                interval: request.interval,
                from: request.from.unwrap_or(unix_epoch()),
                to: request.to,
                source,
            })?;

        self.interrupted(request)?;
        if request.mode == DownloadMode::Fill {
            self.fill(run, request, &notation)?;
        }
        self.append(run, request, &notation)?;

        // The flow exists from here on even if the source had nothing.
        self.merge_declaring(run, request, Vec::new(), request.from, request.to)
    }

    fn fill(&self, run: &mut Run, request: &ScheduleRequest, notation: &str) -> Result<(), AggregateError> {
        let mut search_from = request.from;
        while !run.budget.is_exhausted() {
            let gap = current_flow(&run.dataset, request)
                .and_then(|flow| flow.find_gap(search_from, request.to));
            let Some(gap) = gap else {
                break;
            };

            let page = self.fetch(run, request, notation, gap.start, Some(gap.end))?;
            let landed = page
                .iter()
                .filter_map(|point| point.time)
                .any(|time| gap.contains(time));
            self.merge_page(run, request, page)?;

            if !landed {
                self.engine.diagnostics().warn(&format!(
                    "no data available for {} {} between {} and {}; leaving the gap",
                    request.key.symbol, request.interval, gap.start, gap.end
                ));
                search_from = Some(gap.end);
            }
        }
        Ok(())
    }

    fn append(&self, run: &mut Run, request: &ScheduleRequest, notation: &str) -> Result<(), AggregateError> {
        let last_stored = current_flow(&run.dataset, request).and_then(MarketFlow::last_time);
        let mut cursor = match (last_stored, request.from) {
            (Some(last), Some(from)) => last.max(from),
            (last, from) => last.or(from).unwrap_or(unix_epoch()),
        };

        loop {
            if run.budget.is_exhausted() || request.to.is_some_and(|to| cursor > to) {
                return Ok(());
            }
            let requested = run.budget.remaining();
            let page = self.fetch(run, request, notation, cursor, request.to)?;
            let received = page.len();
            let last = page.iter().filter_map(|point| point.time).max();
            self.merge_page(run, request, page)?;

            if received < requested {
                return Ok(());
            }
            match last.and_then(|t| request.interval.advance(t, 1)) {
                Some(next) if next > cursor => cursor = next,
                _ => return Ok(()),
            }
        }
    }

    fn fetch(
        &self,
        run: &mut Run,
        request: &ScheduleRequest,
        notation: &str,
        from: NaiveDateTime,
        to: Option<NaiveDateTime>,
    ) -> Result<Vec<MarketInstant>, AggregateError> {
        self.interrupted(request)?;
        let limit = run.budget.remaining();
        let page = self
            .source
            .fetch_historical(&request.key.symbol, notation, from, to, Some(limit))
            .map_err(|source| AggregateError::Source {
                symbol: request.key.symbol.clone(),
                interval: request.interval,
                from,
                to,
                source,
            })?;
        run.fetches.push(FetchRecord {
            from,
            to,
            limit,
            received: page.len(),
        });
        self.interrupted(request)?;

        run.budget.consume(page.len());
        run.points += page.len();
        if let (Some(first), Some(last)) = (page.first(), page.last()) {
            self.engine.diagnostics().status(&format!(
                "{} data points were downloaded successfully between {} and {}.",
                page.len(),
                first.time,
                last.time
            ));
        } else {
            self.engine.diagnostics().status(&format!(
                "No data points were available for {} {} from {from}.",
                request.key.symbol, request.interval
            ));
        }
        Ok(page.into_iter().map(MarketInstant::from).collect())
    }

    /// Merge a page, declaring the span of the points it brought.
    fn merge_page(
        &self,
        run: &mut Run,
        request: &ScheduleRequest,
        points: Vec<MarketInstant>,
    ) -> Result<(), AggregateError> {
        let times = || {
            points
                .iter()
                .filter(|point| point.is_finite())
                .filter_map(|point| point.time)
        };
        let (first, last) = (times().min(), times().max());
        self.merge_declaring(run, request, points, first, last)
    }

    fn merge_declaring(
        &self,
        run: &mut Run,
        request: &ScheduleRequest,
        points: Vec<MarketInstant>,
        requested_start: Option<NaiveDateTime>,
        requested_end: Option<NaiveDateTime>,
    ) -> Result<(), AggregateError> {
        let existing = current_flow(&run.dataset, request);
        let (start, end) = covering_bounds(existing, requested_start, requested_end, &points);
        let merge = MergeRequest::new(request.key.clone(), request.interval, points).declaring(start, end);
        run.dataset = self
            .engine
            .merge(&run.dataset, merge)
            .map_err(|source| AggregateError::Merge {
                symbol: request.key.symbol.clone(),
                interval: request.interval,
                source,
            })?;
        Ok(())
    }

    fn interrupted(&self, request: &ScheduleRequest) -> Result<(), AggregateError> {
        self.cancel.check().map_err(|reason| {
            let symbol = request.key.symbol.clone();
            let interval = request.interval;
            match reason {
                Interruption::Cancelled => AggregateError::Cancelled { symbol, interval },
                Interruption::TimedOut => AggregateError::TimedOut { symbol, interval },
            }
        })
    }
}

/// Start of append downloads with neither stored points nor a requested start.
fn unix_epoch() -> NaiveDateTime {
    NaiveDateTime::default()
}

fn current_flow<'d>(dataset: &'d Dataset, request: &ScheduleRequest) -> Option<&'d MarketFlow> {
    dataset.flow_by_name(&request.key.symbol, request.interval)
}
