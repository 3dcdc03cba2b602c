//! Pruning: drop symbols, intervals and points by filter.
//!
//! Filters are written `<type>:<value>`:
//!
//! | type            | value                                        |
//! |-----------------|----------------------------------------------|
//! | `S`, `Symbol`   | symbol name, e.g. `KRAKEN_SPOT_BTC_USD`      |
//! | `I`, `Interval` | interval, e.g. `1DAY`, `15m`                 |
//! | `T`, `Time`     | `[X,Y]`, `(,X]`, `[X,)`, `[X]` or `X`        |
//!
//! Within one filter, terms of the same type are alternatives and terms of
//! different types must all match. A flow or symbol is only dropped whole
//! when the exclusion filter says nothing about finer levels.

use crate::data::timestamp::{parse_user_time, TimestampError};
use crate::diagnostics::Diagnostics;
use crate::domain::{parse_interval, Dataset, Interval, IntervalError, TimeRange};
use crate::merge::DatasetBuilder;
use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterSpecError {
    #[error("filter '{0}' must look like <type>:<value>")]
    MissingSeparator(String),

    #[error("unknown filter type '{0}' (expected S/Symbol, I/Interval or T/Time)")]
    UnknownType(String),

    #[error("filter '{0}' has an empty value")]
    EmptyValue(String),

    #[error("invalid interval in filter: {0}")]
    Interval(#[from] IntervalError),

    #[error("invalid time in filter: {0}")]
    Time(#[from] TimestampError),

    #[error("time ranges must be inclusive: '{0}'")]
    ExclusiveRange(String),

    #[error("malformed time range '{0}'")]
    MalformedRange(String),

    #[error("time range starts at {start} after it ends at {end}")]
    InvertedRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

/// One parsed `<type>:<value>` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterTerm {
    Symbol(String),
    Interval(Interval),
    Time(TimeRange),
}

impl FromStr for FilterTerm {
    type Err = FilterSpecError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (kind, value) = spec
            .split_once(':')
            .ok_or_else(|| FilterSpecError::MissingSeparator(spec.to_string()))?;
        let value = value.trim();
        if value.is_empty() {
            return Err(FilterSpecError::EmptyValue(spec.to_string()));
        }
        match kind.trim().to_ascii_lowercase().as_str() {
            "s" | "symbol" => Ok(FilterTerm::Symbol(value.to_string())),
            "i" | "interval" => Ok(FilterTerm::Interval(parse_interval(value)?)),
            "t" | "time" => Ok(FilterTerm::Time(parse_time_range(value)?)),
            _ => Err(FilterSpecError::UnknownType(kind.to_string())),
        }
    }
}

/// Parse `[X,Y]`, `(,X]`, `[X,)`, `[X]` or `X`.
pub fn parse_time_range(value: &str) -> Result<TimeRange, FilterSpecError> {
    let value = value.trim();
    let malformed = || FilterSpecError::MalformedRange(value.to_string());

    let Some(open) = value.chars().next().filter(|c| matches!(c, '[' | '(')) else {
        return Ok(TimeRange::at(parse_user_time(value)?));
    };
    let close = value.chars().last().filter(|c| matches!(c, ']' | ')')).ok_or_else(malformed)?;
    let inner = value.get(1..value.len() - 1).ok_or_else(malformed)?;

    let (start, end) = match inner.split_once(',') {
        Some((start, end)) => (start.trim(), end.trim()),
        None => (inner.trim(), inner.trim()),
    };
    if (open == '(' && !start.is_empty()) || (close == ')' && !end.is_empty()) {
        return Err(FilterSpecError::ExclusiveRange(value.to_string()));
    }
    if start.is_empty() && end.is_empty() && !inner.contains(',') {
        return Err(malformed());
    }

    let bound = |raw: &str| -> Result<Option<NaiveDateTime>, FilterSpecError> {
        if raw.is_empty() {
            Ok(None)
        } else {
            Ok(Some(parse_user_time(raw)?))
        }
    };
    let start = bound(start)?.unwrap_or(NaiveDateTime::MIN);
    let end = bound(end)?.unwrap_or(NaiveDateTime::MAX);
    if start > end {
        return Err(FilterSpecError::InvertedRange { start, end });
    }
    Ok(TimeRange::new(start, end))
}

/// Terms of a constrained filter; an empty list does not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    pub symbols: BTreeSet<String>,
    pub intervals: BTreeSet<Interval>,
    pub times: Vec<TimeRange>,
}

impl FilterSet {
    fn symbol(&self, name: &str) -> bool {
        self.symbols.is_empty() || self.symbols.iter().any(|s| s.eq_ignore_ascii_case(name))
    }

    fn interval(&self, interval: Interval) -> bool {
        self.intervals.is_empty() || self.intervals.contains(&interval)
    }

    fn time(&self, time: NaiveDateTime) -> bool {
        self.times.is_empty() || self.times.iter().any(|range| range.contains(time))
    }
}

/// Selection of dataset content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetFilter {
    All,
    None,
    Constrained(FilterSet),
}

impl DatasetFilter {
    /// Collect terms; with no terms the filter is `when_empty`.
    pub fn from_terms<I>(terms: I, when_empty: DatasetFilter) -> Self
    where
        I: IntoIterator<Item = FilterTerm>,
    {
        let mut set = FilterSet::default();
        let mut any = false;
        for term in terms {
            any = true;
            match term {
                FilterTerm::Symbol(symbol) => {
                    set.symbols.insert(symbol);
                }
                FilterTerm::Interval(interval) => {
                    set.intervals.insert(interval);
                }
                FilterTerm::Time(range) => set.times.push(range),
            }
        }
        if any {
            DatasetFilter::Constrained(set)
        } else {
            when_empty
        }
    }

    /// Parse `<type>:<value>` specs.
    pub fn parse<S: AsRef<str>>(specs: &[S], when_empty: DatasetFilter) -> Result<Self, FilterSpecError> {
        let terms = specs
            .iter()
            .map(|spec| spec.as_ref().parse())
            .collect::<Result<Vec<FilterTerm>, _>>()?;
        Ok(Self::from_terms(terms, when_empty))
    }

    pub fn matches_symbol(&self, name: &str) -> bool {
        match self {
            DatasetFilter::All => true,
            DatasetFilter::None => false,
            DatasetFilter::Constrained(set) => set.symbol(name),
        }
    }

    pub fn matches_flow(&self, name: &str, interval: Interval) -> bool {
        match self {
            DatasetFilter::All => true,
            DatasetFilter::None => false,
            DatasetFilter::Constrained(set) => set.symbol(name) && set.interval(interval),
        }
    }

    pub fn matches_point(&self, name: &str, interval: Interval, time: NaiveDateTime) -> bool {
        match self {
            DatasetFilter::All => true,
            DatasetFilter::None => false,
            DatasetFilter::Constrained(set) => {
                set.symbol(name) && set.interval(interval) && set.time(time)
            }
        }
    }

    fn constrains_intervals(&self) -> bool {
        matches!(self, DatasetFilter::Constrained(set) if !set.intervals.is_empty())
    }

    fn constrains_times(&self) -> bool {
        matches!(self, DatasetFilter::Constrained(set) if !set.times.is_empty())
    }
}

/// What a prune removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub symbols: usize,
    pub flows: usize,
    pub points: usize,
}

/// Keep what `inclusion` matches and `exclusion` does not.
///
/// Symbols left without any flow are removed along with terms nothing else
/// references. The input dataset is not modified.
pub fn prune(
    dataset: &Dataset,
    inclusion: &DatasetFilter,
    exclusion: &DatasetFilter,
    diagnostics: &dyn Diagnostics,
) -> Dataset {
    prune_with_report(dataset, inclusion, exclusion, diagnostics).0
}

pub fn prune_with_report(
    dataset: &Dataset,
    inclusion: &DatasetFilter,
    exclusion: &DatasetFilter,
    diagnostics: &dyn Diagnostics,
) -> (Dataset, PruneReport) {
    let mut builder = DatasetBuilder::from_base(dataset, diagnostics);
    let mut report = PruneReport::default();
    let exclusion_is_coarse = !exclusion.constrains_intervals() && !exclusion.constrains_times();

    let symbols: BTreeSet<_> = dataset
        .index()
        .symbols()
        .keys()
        .chain(dataset.data().keys())
        .copied()
        .collect();

    for id in symbols {
        let Ok(name) = dataset.index().terms().lookup(id) else {
            continue;
        };
        if !inclusion.matches_symbol(name) || (exclusion_is_coarse && exclusion.matches_symbol(name)) {
            builder.remove_symbol(id);
            report.symbols += 1;
            continue;
        }

        let Some(group) = dataset.group(id) else {
            continue;
        };
        let mut kept_flows = 0;
        for interval in group.intervals() {
            let excluded_whole = !exclusion.constrains_times() && exclusion.matches_flow(name, interval);
            if !inclusion.matches_flow(name, interval) || excluded_whole {
                builder.remove_flow(id, interval);
                report.flows += 1;
                continue;
            }
            kept_flows += 1;
            if inclusion.constrains_times() || exclusion.matches_flow(name, interval) {
                let mut flow = builder.take_flow(id, interval);
                report.points += flow.retain_points(|time| {
                    inclusion.matches_point(name, interval, time)
                        && !exclusion.matches_point(name, interval, time)
                });
                builder.put_flow(id, flow);
            }
        }
        if kept_flows == 0 {
            builder.remove_symbol(id);
            report.symbols += 1;
        }
    }

    diagnostics.status(&format!(
        "Pruned {} symbols, {} flows and {} points",
        report.symbols, report.flows, report.points
    ));
    (builder.commit(), report)
}
