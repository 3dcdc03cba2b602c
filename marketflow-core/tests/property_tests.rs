//! Property tests for dataset invariants.
//!
//! Uses proptest to verify:
//! 1. Idempotent merge: merging the same points twice equals merging once
//! 2. Monotonic widening: declared bounds never shrink across merges
//! 3. Index injectivity: distinct names get distinct ids and round-trip
//! 4. Interval round trip: notation parses back to the same interval
//! 5. Gap detection: the first gap is the first run of missing ticks
//! 6. Storage round trip: any finite OHLCV values survive store and extract

use chrono::{NaiveDate, NaiveDateTime};
use marketflow_core::diagnostics::Silent;
use marketflow_core::domain::{
    parse_interval, Dataset, Denomination, Interval, MarketInstant, TermIndex, TimeRange,
};
use marketflow_core::merge::{covering_bounds, merge, MergeRequest, SymbolKey};
use marketflow_core::storage::{StorageFormat, TransparentFormat};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

// ── Strategies (proptest) ────────────────────────────────────────────

fn day(offset: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::days(i64::from(offset))
}

fn daily() -> Interval {
    Interval::days(1).unwrap()
}

fn key() -> SymbolKey {
    SymbolKey::new("KRAKEN_SPOT_BTC_USD", "BTC", "USD", "KRAKEN")
}

fn arb_points() -> impl Strategy<Value = Vec<MarketInstant>> {
    prop::collection::vec((0u32..90, 1.0..1000.0_f64), 0..40).prop_map(|raw| {
        raw.into_iter()
            .map(|(offset, price)| MarketInstant::flat(day(offset), price, 1.0))
            .collect()
    })
}

/// Finite values across the whole f64 range, extremes included.
fn arb_finite() -> impl Strategy<Value = f64> + Clone {
    use prop::num::f64::{NEGATIVE, NORMAL, POSITIVE, SUBNORMAL, ZERO};
    prop_oneof![
        4 => POSITIVE | NEGATIVE | NORMAL | SUBNORMAL | ZERO,
        1 => prop::sample::select(vec![
            f64::MAX,
            f64::MIN,
            f64::MIN_POSITIVE,
            f64::EPSILON,
            5e-324,
            1e-300,
            0.1 + 0.2,
        ]),
    ]
}

fn arb_ohlcv() -> impl Strategy<Value = Vec<MarketInstant>> {
    prop::collection::vec(
        (0u32..90, prop::array::uniform5(arb_finite())),
        1..20,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .map(|(offset, [open, high, low, close, volume])| {
                MarketInstant::new(day(offset), open, high, low, close, volume)
            })
            .collect()
    })
}

fn arb_interval() -> impl Strategy<Value = Interval> {
    (1u32..=10_000, 0usize..Denomination::ALL.len())
        .prop_map(|(length, d)| Interval::new(length, Denomination::ALL[d]).unwrap())
}

fn arb_bound() -> impl Strategy<Value = Option<NaiveDateTime>> {
    prop::option::of((0u32..120).prop_map(day))
}

fn merged(base: &Dataset, points: Vec<MarketInstant>, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Dataset {
    let existing = base.flow_by_name(&key().symbol, daily());
    let (start, end) = covering_bounds(existing, start, end, &points);
    let request = MergeRequest::new(key(), daily(), points).declaring(start, end);
    merge(base, request, &Silent).unwrap()
}

// ── 1. Idempotent merge ──────────────────────────────────────────────

proptest! {
    #[test]
    fn merging_twice_equals_merging_once(
        seed in arb_points(),
        batch in arb_points(),
        start in arb_bound(),
        end in arb_bound(),
    ) {
        let base = merged(&Dataset::empty(), seed, None, None);
        let once = merged(&base, batch.clone(), start, end);
        let twice = merged(&once, batch, start, end);
        prop_assert_eq!(once, twice);
    }

    /// Later points for the same timestamp win.
    #[test]
    fn upsert_keeps_latest_value(offset in 0u32..90, first in 1.0..10.0_f64, second in 20.0..30.0_f64) {
        let base = merged(&Dataset::empty(), vec![MarketInstant::flat(day(offset), first, 1.0)], None, None);
        let after = merged(&base, vec![MarketInstant::flat(day(offset), second, 1.0)], None, None);
        let flow = after.flow_by_name(&key().symbol, daily()).unwrap();
        prop_assert_eq!(flow.len(), 1);
        prop_assert_eq!(flow.get(day(offset)).unwrap().close, second);
    }
}

// ── 2. Monotonic widening ────────────────────────────────────────────

proptest! {
    #[test]
    fn declared_bounds_never_shrink(
        batches in prop::collection::vec((arb_points(), arb_bound(), arb_bound()), 1..8),
    ) {
        let mut dataset = Dataset::empty();
        let mut previous: Option<(Option<NaiveDateTime>, Option<NaiveDateTime>)> = None;
        for (points, start, end) in batches {
            dataset = merged(&dataset, points, start, end);
            let flow = dataset.flow_by_name(&key().symbol, daily()).unwrap();
            flow.validate().unwrap();
            if let Some((prev_start, prev_end)) = previous {
                if let Some(prev_start) = prev_start {
                    prop_assert!(flow.start().is_some_and(|s| s <= prev_start));
                }
                if let Some(prev_end) = prev_end {
                    prop_assert!(flow.end().is_some_and(|e| e >= prev_end));
                }
            }
            previous = Some((flow.start(), flow.end()));
        }
    }
}

// ── 3. Index injectivity ─────────────────────────────────────────────

proptest! {
    #[test]
    fn term_index_is_injective(names in prop::collection::vec("[A-Z]{1,6}", 1..50)) {
        let mut index = TermIndex::new();
        let mut seen: BTreeMap<String, _> = BTreeMap::new();
        for name in &names {
            let id = index.resolve(name);
            let again = index.resolve(name);
            prop_assert_eq!(id, again);
            prop_assert_eq!(index.lookup(id).unwrap(), name.as_str());
            seen.insert(name.clone(), id);
        }
        let distinct_names: BTreeSet<_> = names.iter().collect();
        let distinct_ids: BTreeSet<_> = seen.values().collect();
        prop_assert_eq!(distinct_names.len(), distinct_ids.len());
        prop_assert_eq!(index.len(), distinct_names.len());
    }
}

// ── 4. Interval round trip ───────────────────────────────────────────

proptest! {
    #[test]
    fn interval_notation_round_trips(interval in arb_interval()) {
        prop_assert_eq!(parse_interval(&interval.notation()).unwrap(), interval);
        prop_assert_eq!(interval.to_string().to_lowercase().parse::<Interval>().unwrap(), interval);
    }

    #[test]
    fn stepping_forward_then_back_returns(interval in arb_interval(), offset in 0u32..3650) {
        // Day 1 of a month is safe for month arithmetic in both directions.
        let start = NaiveDate::from_ymd_opt(2000 + (offset % 30) as i32, 1 + offset % 12, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let next = interval.next_after(start).unwrap();
        prop_assert!(next > start);
        prop_assert_eq!(interval.previous_before(next).unwrap(), start);
    }
}

// ── 5. Gap detection ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn first_gap_is_first_missing_run(offsets in prop::collection::btree_set(0u32..60, 1..40)) {
        let points = offsets.iter().map(|o| MarketInstant::flat(day(*o), 1.0, 1.0)).collect();
        let dataset = merged(&Dataset::empty(), points, None, None);
        let flow = dataset.flow_by_name(&key().symbol, daily()).unwrap();

        let ordered: Vec<u32> = offsets.iter().copied().collect();
        let expected = ordered
            .windows(2)
            .find(|w| w[1] > w[0] + 1)
            .map(|w| TimeRange::new(day(w[0] + 1), day(w[1] - 1)));
        prop_assert_eq!(flow.find_gap(None, None), expected);
    }
}

// ── 6. Storage round trip ────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn finite_values_survive_store_and_extract(points in arb_ohlcv()) {
        let dataset = merged(&Dataset::empty(), points, None, None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.dat");
        let storage = TransparentFormat::new();

        storage.store(&dataset, &path).unwrap();
        let restored = storage.extract(&path).unwrap().unwrap();
        prop_assert_eq!(restored, dataset);
    }
}
