//! MarketFlow: the time-series store for one (symbol, interval) pair.
//!
//! Points are keyed by timestamp, so a later write for the same timestamp
//! replaces the earlier one. The declared `start`/`end` are inclusive bounds
//! on what the flow claims to cover; they only ever widen, and every stored
//! point must fall inside them.

use super::instant::MarketInstant;
use super::interval::Interval;
use crate::diagnostics::Diagnostics;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use thiserror::Error;

/// Invalid declared range or stored point for a flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("invalid range: start {start} is after end {end}")]
    InvertedBounds {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("invalid range: start {start} would exclude the stored point at {first}")]
    StartExcludesPoints {
        start: NaiveDateTime,
        first: NaiveDateTime,
    },

    #[error("invalid range: end {end} would exclude the stored point at {last}")]
    EndExcludesPoints {
        end: NaiveDateTime,
        last: NaiveDateTime,
    },

    #[error("the point at {time} holds a value that is not finite")]
    NonFinite { time: NaiveDateTime },
}

/// Inclusive, bounded time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// A range covering a single instant.
    pub fn at(instant: NaiveDateTime) -> Self {
        Self::new(instant, instant)
    }

    /// Every representable instant.
    pub fn everything() -> Self {
        Self::new(NaiveDateTime::MIN, NaiveDateTime::MAX)
    }

    /// `start..=MAX`.
    pub fn starting_at(start: NaiveDateTime) -> Self {
        Self::new(start, NaiveDateTime::MAX)
    }

    /// `MIN..=end`.
    pub fn ending_at(end: NaiveDateTime) -> Self {
        Self::new(NaiveDateTime::MIN, end)
    }

    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        self.start <= instant && instant <= self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Counts from one upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub inserted: usize,
    pub replaced: usize,
    pub skipped: usize,
}

/// Time series for one symbol at one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketFlow {
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    interval: Interval,
    #[serde(with = "point_seq")]
    points: BTreeMap<NaiveDateTime, MarketInstant>,
}

impl MarketFlow {
    /// An empty flow with no declared coverage.
    pub fn new(interval: Interval) -> Self {
        Self {
            start: None,
            end: None,
            interval,
            points: BTreeMap::new(),
        }
    }

    /// An empty flow claiming the given coverage.
    pub fn with_bounds(
        interval: Interval,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Self, FlowError> {
        let mut flow = Self::new(interval);
        flow.widen(start, end)?;
        Ok(flow)
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDateTime> {
        self.end
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn points(&self) -> &BTreeMap<NaiveDateTime, MarketInstant> {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, time: NaiveDateTime) -> Option<&MarketInstant> {
        self.points.get(&time)
    }

    pub fn first_time(&self) -> Option<NaiveDateTime> {
        self.points.keys().next().copied()
    }

    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.points.keys().next_back().copied()
    }

    /// Insert points, replacing any stored point at the same timestamp.
    ///
    /// Points without a timestamp, or with a NaN or infinite value, are
    /// skipped with a warning.
    pub fn upsert<I>(&mut self, points: I, diagnostics: &dyn Diagnostics) -> UpsertReport
    where
        I: IntoIterator<Item = MarketInstant>,
    {
        let mut report = UpsertReport::default();
        for point in points {
            let Some(time) = point.time else {
                report.skipped += 1;
                diagnostics.warn(&format!(
                    "Skipping {} point without a timestamp: {point:?}",
                    self.interval
                ));
                continue;
            };
            if !point.is_finite() {
                report.skipped += 1;
                diagnostics.warn(&format!(
                    "Skipping {} point at {time} with a value that is not finite: {point:?}",
                    self.interval
                ));
                continue;
            }
            match self.points.insert(time, point) {
                Some(_) => report.replaced += 1,
                None => report.inserted += 1,
            }
        }
        report
    }

    /// Extend the declared bounds to the union of the old and new bounds.
    ///
    /// An absent bound on either side leaves that side to the other value.
    /// Fails without modifying the flow if the result is inverted or would
    /// exclude a stored point.
    pub fn widen(
        &mut self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<(), FlowError> {
        let start = union_min(self.start, start);
        let end = union_max(self.end, end);
        check_bounds(start, end, self.first_time(), self.last_time())?;
        self.start = start;
        self.end = end;
        Ok(())
    }

    /// Check the declared bounds against the stored points, and that every
    /// stored value is finite.
    pub fn validate(&self) -> Result<(), FlowError> {
        check_bounds(self.start, self.end, self.first_time(), self.last_time())?;
        match self.points.iter().find(|(_, point)| !point.is_finite()) {
            Some((&time, _)) => Err(FlowError::NonFinite { time }),
            None => Ok(()),
        }
    }

    /// Points with timestamps in `[from, to]`; an absent bound is open.
    pub fn range(
        &self,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> impl DoubleEndedIterator<Item = &MarketInstant> + '_ {
        self.points.range(key_bounds(from, to)).map(|(_, point)| point)
    }

    /// First run of missing ticks among the points stored in `[from, to]`.
    ///
    /// The returned range starts one step after the last present point and
    /// ends one step before the next present point. Nothing is reported
    /// before the first or after the last stored point in the window.
    pub fn find_gap(
        &self,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> Option<TimeRange> {
        let mut keys = self.points.range(key_bounds(from, to)).map(|(time, _)| *time);
        let mut previous = keys.next()?;
        for current in keys {
            let expected = self.interval.advance(previous, 1)?;
            if current > expected {
                let end = self.interval.advance(current, -1)?.max(expected);
                return Some(TimeRange::new(expected, end));
            }
            previous = current;
        }
        None
    }

    /// Drop every point whose timestamp fails `keep`. Declared bounds stay.
    pub fn retain_points<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(NaiveDateTime) -> bool,
    {
        let before = self.points.len();
        self.points.retain(|time, _| keep(*time));
        before - self.points.len()
    }
}

fn union_min(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn union_max(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn check_bounds(
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    first: Option<NaiveDateTime>,
    last: Option<NaiveDateTime>,
) -> Result<(), FlowError> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(FlowError::InvertedBounds { start, end });
        }
    }
    if let (Some(start), Some(first)) = (start, first) {
        if first < start {
            return Err(FlowError::StartExcludesPoints { start, first });
        }
    }
    if let (Some(end), Some(last)) = (end, last) {
        if last > end {
            return Err(FlowError::EndExcludesPoints { end, last });
        }
    }
    Ok(())
}

// An inverted window maps to an empty (but valid) BTreeMap range.
fn key_bounds(
    from: Option<NaiveDateTime>,
    to: Option<NaiveDateTime>,
) -> (Bound<NaiveDateTime>, Bound<NaiveDateTime>) {
    match (from, to) {
        (Some(from), Some(to)) if from > to => (Bound::Included(from), Bound::Excluded(from)),
        _ => (
            from.map_or(Bound::Unbounded, Bound::Included),
            to.map_or(Bound::Unbounded, Bound::Included),
        ),
    }
}

/// Points are stored as a plain sequence; untimed entries are dropped on load.
mod point_seq {
    use super::MarketInstant;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(
        points: &BTreeMap<NaiveDateTime, MarketInstant>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(points.values())
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<NaiveDateTime, MarketInstant>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let points = Vec::<MarketInstant>::deserialize(deserializer)?;
        Ok(points
            .into_iter()
            .filter_map(|point| point.time.map(|time| (time, point)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{RecordingDiagnostics, Silent};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn daily_flow(days: &[u32]) -> MarketFlow {
        let mut flow = MarketFlow::new(Interval::days(1).unwrap());
        flow.upsert(days.iter().map(|&d| MarketInstant::flat(day(d), 100.0, 1.0)), &Silent);
        flow
    }

    // ── Upsert ──

    #[test]
    fn upsert_replaces_same_timestamp() {
        let mut flow = daily_flow(&[1, 2]);
        let report = flow.upsert([MarketInstant::flat(day(2), 200.0, 5.0)], &Silent);

        assert_eq!(report, UpsertReport { inserted: 0, replaced: 1, skipped: 0 });
        assert_eq!(flow.len(), 2);
        assert_eq!(flow.get(day(2)).unwrap().close, 200.0);
    }

    #[test]
    fn upsert_skips_untimed_points_with_warning() {
        let diag = RecordingDiagnostics::new();
        let mut flow = daily_flow(&[1]);
        let mut untimed = MarketInstant::flat(day(5), 1.0, 1.0);
        untimed.time = None;

        let report = flow.upsert([untimed, MarketInstant::flat(day(3), 1.0, 1.0)], &diag);

        assert_eq!(report.skipped, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(diag.warnings().len(), 1);
    }

    #[test]
    fn upsert_skips_non_finite_points_with_warning() {
        let diag = RecordingDiagnostics::new();
        let mut flow = daily_flow(&[1]);
        let mut no_volume = MarketInstant::flat(day(3), 1.0, f64::NAN);
        let unbounded = MarketInstant::flat(day(4), f64::INFINITY, 1.0);
        no_volume.low = f64::NEG_INFINITY;

        let report = flow.upsert([no_volume, unbounded, MarketInstant::flat(day(1), 2.0, 1.0)], &diag);

        assert_eq!(report.skipped, 2);
        assert_eq!(report.replaced, 1);
        assert_eq!(flow.len(), 1);
        assert_eq!(diag.warnings().len(), 2);
        flow.validate().unwrap();
    }

    #[test]
    fn validate_rejects_a_stored_non_finite_point() {
        let mut flow = daily_flow(&[1]);
        flow.points.insert(day(2), MarketInstant::flat(day(2), f64::NAN, 1.0));
        assert_eq!(flow.validate(), Err(FlowError::NonFinite { time: day(2) }));
    }

    // ── Widen ──

    #[test]
    fn widen_takes_union_of_bounds() {
        let mut flow = MarketFlow::with_bounds(flow_interval(), Some(day(5)), Some(day(10))).unwrap();
        flow.widen(Some(day(7)), Some(day(20))).unwrap();
        assert_eq!(flow.start(), Some(day(5)));
        assert_eq!(flow.end(), Some(day(20)));

        flow.widen(Some(day(1)), None).unwrap();
        assert_eq!(flow.start(), Some(day(1)));
        assert_eq!(flow.end(), Some(day(20)));
    }

    #[test]
    fn widen_rejects_bounds_excluding_points() {
        let mut flow = daily_flow(&[3, 4, 5]);
        let err = flow.widen(None, Some(day(4))).unwrap_err();
        assert_eq!(err, FlowError::EndExcludesPoints { end: day(4), last: day(5) });
        assert_eq!(flow.end(), None, "failed widen leaves the flow unchanged");

        let err = flow.widen(Some(day(4)), None).unwrap_err();
        assert!(matches!(err, FlowError::StartExcludesPoints { .. }));
    }

    #[test]
    fn widen_rejects_inverted_range() {
        let err = MarketFlow::with_bounds(flow_interval(), Some(day(9)), Some(day(2))).unwrap_err();
        assert!(matches!(err, FlowError::InvertedBounds { .. }));
    }

    fn flow_interval() -> Interval {
        Interval::days(1).unwrap()
    }

    // ── Gap detection ──

    #[test]
    fn finds_single_missing_tick() {
        let flow = daily_flow(&[1, 2, 4]);
        assert_eq!(flow.find_gap(Some(day(1)), Some(day(4))), Some(TimeRange::at(day(3))));
    }

    #[test]
    fn finds_multi_tick_gap() {
        let flow = daily_flow(&[1, 5, 6]);
        assert_eq!(
            flow.find_gap(None, None),
            Some(TimeRange::new(day(2), day(4)))
        );
    }

    #[test]
    fn gap_search_is_restricted_to_window() {
        let flow = daily_flow(&[1, 3, 4, 8]);
        assert_eq!(flow.find_gap(Some(day(3)), None), Some(TimeRange::new(day(5), day(7))));
        assert_eq!(flow.find_gap(Some(day(3)), Some(day(7))), None);
    }

    #[test]
    fn no_gap_when_contiguous_or_empty() {
        assert_eq!(daily_flow(&[1, 2, 3]).find_gap(None, None), None);
        assert_eq!(daily_flow(&[]).find_gap(None, None), None);
        assert_eq!(daily_flow(&[1, 5]).find_gap(Some(day(9)), Some(day(2))), None);
    }

    #[test]
    fn monthly_gap_uses_calendar_steps() {
        let mut flow = MarketFlow::new(Interval::months(1).unwrap());
        let month = |m| NaiveDate::from_ymd_opt(2021, m, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        flow.upsert([1, 2, 5].map(|m| MarketInstant::flat(month(m), 1.0, 1.0)), &Silent);
        assert_eq!(flow.find_gap(None, None), Some(TimeRange::new(month(3), month(4))));
    }

    // ── Queries ──

    #[test]
    fn range_is_inclusive() {
        let flow = daily_flow(&[1, 2, 3, 4, 5]);
        let times: Vec<_> = flow.range(Some(day(2)), Some(day(4))).filter_map(|p| p.time).collect();
        assert_eq!(times, vec![day(2), day(3), day(4)]);
        assert_eq!(flow.range(Some(day(4)), Some(day(2))).count(), 0);
    }

    #[test]
    fn retain_keeps_bounds() {
        let mut flow = daily_flow(&[1, 2, 3]);
        flow.widen(Some(day(1)), Some(day(3))).unwrap();
        let removed = flow.retain_points(|t| t != day(2));
        assert_eq!(removed, 1);
        assert_eq!(flow.end(), Some(day(3)));
        assert!(flow.validate().is_ok());
    }

    #[test]
    fn serde_round_trip_keeps_points_ordered() {
        let flow = daily_flow(&[3, 1, 2]);
        let json = serde_json::to_string(&flow).unwrap();
        let back: MarketFlow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flow);
        assert_eq!(back.first_time(), Some(day(1)));
    }
}
