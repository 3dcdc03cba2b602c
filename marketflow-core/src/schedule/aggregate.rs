//! Aggregation: extract, resolve, schedule, store.

use super::{AggregateError, CancelToken, DownloadMode, FetchRecord, ScheduleRequest, Scheduler};
use crate::data::{MarketDataSource, ResolvedSymbol};
use crate::domain::{Dataset, Interval};
use crate::merge::MergeEngine;
use crate::storage::StorageFormat;
use chrono::NaiveDateTime;
use std::path::Path;

/// What to download, named the way a user types it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRequest {
    pub exchange: String,
    pub base: String,
    pub quote: String,
    pub interval: Interval,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
    pub limit: usize,
    pub mode: DownloadMode,
    /// Store whatever was merged before a failure.
    pub keep_partial: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOutcome {
    pub symbol: ResolvedSymbol,
    pub dataset: Dataset,
    pub fetches: Vec<FetchRecord>,
    pub points: usize,
}

/// Download one symbol at one interval into the dataset stored at `path`.
///
/// The stored dataset is replaced only after the whole download succeeded,
/// unless `keep_partial` is set.
pub fn aggregate(
    request: &AggregateRequest,
    source: &dyn MarketDataSource,
    storage: &dyn StorageFormat,
    path: &Path,
    engine: &MergeEngine<'_>,
    cancel: &CancelToken,
) -> Result<AggregateOutcome, AggregateError> {
    if !storage.can_store_to(path) {
        return Err(AggregateError::InvalidRequest(format!(
            "cannot store a dataset at {}",
            path.display()
        )));
    }
    if request.limit == 0 {
        return Err(AggregateError::InvalidRequest(
            "the entry limit must be positive".into(),
        ));
    }

    let base = storage.extract(path)?.unwrap_or_default();
    let diagnostics = engine.diagnostics();
    diagnostics.status(&format!(
        "Resolving {}/{} on {} with {}",
        request.base,
        request.quote,
        request.exchange,
        source.name()
    ));
    let symbol = source
        .resolve_symbol(&request.exchange, &request.base, &request.quote)
        .map_err(|e| AggregateError::Resolve {
            exchange: request.exchange.clone(),
            base: request.base.clone(),
            quote: request.quote.clone(),
            source: e,
        })?;

    let schedule = ScheduleRequest {
        key: symbol.key(),
        interval: request.interval,
        from: request.from,
        to: request.to,
        limit: request.limit,
        mode: request.mode,
    };
    match Scheduler::new(source, *engine, cancel).run(base, &schedule) {
        Ok(outcome) => {
            storage.store(&outcome.dataset, path)?;
            diagnostics.status(&format!(
                "Stored {} new points for {} {} in {}",
                outcome.points,
                symbol.symbol_id,
                request.interval,
                path.display()
            ));
            Ok(AggregateOutcome {
                symbol,
                dataset: outcome.dataset,
                fetches: outcome.fetches,
                points: outcome.points,
            })
        }
        Err(failure) => {
            if request.keep_partial && !failure.fetches.is_empty() {
                match storage.store(&failure.partial, path) {
                    Ok(()) => diagnostics.warn(&format!(
                        "stored partial data for {} {} after failure",
                        symbol.symbol_id, request.interval
                    )),
                    Err(e) => diagnostics.warn(&format!("could not store partial data: {e}")),
                }
            }
            Err(failure.error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SourceError, SourcePoint};
    use crate::diagnostics::Silent;
    use crate::domain::MarketInstant;
    use crate::merge::{MergeRequest, SymbolKey};
    use crate::storage::TransparentFormat;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    /// Daily points for the 1st to the 3rd; later requests fail if `fail`
    /// is set.
    struct ThreeDays {
        fail: bool,
    }

    impl MarketDataSource for ThreeDays {
        fn name(&self) -> &str {
            "three-days"
        }

        fn limit_request_factor(&self) -> usize {
            3
        }

        fn to_source_notation(&self, interval: Interval) -> Result<String, SourceError> {
            Ok(interval.notation())
        }

        fn resolve_symbol(&self, exchange: &str, base: &str, quote: &str) -> Result<ResolvedSymbol, SourceError> {
            if base == "NOPE" {
                return Err(SourceError::SymbolNotFound {
                    exchange: exchange.into(),
                    base: base.into(),
                    quote: quote.into(),
                });
            }
            Ok(ResolvedSymbol {
                symbol_id: format!("{exchange}_SPOT_{base}_{quote}"),
                base: base.into(),
                quote: quote.into(),
                exchange: exchange.into(),
            })
        }

        fn fetch_historical(
            &self,
            _symbol_id: &str,
            _interval_notation: &str,
            from: NaiveDateTime,
            to: Option<NaiveDateTime>,
            _limit: Option<usize>,
        ) -> Result<Vec<SourcePoint>, SourceError> {
            if from > day(3) {
                return if self.fail {
                    Err(SourceError::NetworkUnreachable("down".into()))
                } else {
                    Ok(Vec::new())
                };
            }
            Ok((1..=3)
                .map(day)
                .filter(|time| *time >= from && to.map_or(true, |to| *time <= to))
                .map(|time| SourcePoint {
                    time,
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: 1.0,
                    trades: 1,
                })
                .collect())
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn request() -> AggregateRequest {
        AggregateRequest {
            exchange: "KRAKEN".into(),
            base: "BTC".into(),
            quote: "USD".into(),
            interval: Interval::days(1).unwrap(),
            from: Some(day(1)),
            to: None,
            limit: 1,
            mode: DownloadMode::Append,
            keep_partial: false,
        }
    }

    #[test]
    fn stores_downloaded_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.dat");
        let storage = TransparentFormat::new();

        let outcome = aggregate(
            &request(),
            &ThreeDays { fail: false },
            &storage,
            &path,
            &MergeEngine::new(&Silent),
            &CancelToken::new(),
        )
        .unwrap();

        // A limit of 1 rounds up to one page of 3.
        assert_eq!(outcome.points, 3);
        assert_eq!(outcome.fetches[0].limit, 3);
        let stored = storage.extract(&path).unwrap().unwrap();
        assert_eq!(stored, outcome.dataset);
        assert_eq!(stored.flow_by_name("KRAKEN_SPOT_BTC_USD", Interval::days(1).unwrap()).unwrap().len(), 3);
    }

    #[test]
    fn failure_leaves_storage_untouched_unless_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.dat");
        let storage = TransparentFormat::new();
        let interval = Interval::days(1).unwrap();
        let seeded = crate::merge::merge(
            &Dataset::empty(),
            MergeRequest::new(
                SymbolKey::new("KRAKEN_SPOT_BTC_USD", "BTC", "USD", "KRAKEN"),
                interval,
                vec![MarketInstant::flat(day(1), 1.0, 1.0), MarketInstant::flat(day(5), 1.0, 1.0)],
            ),
            &Silent,
        )
        .unwrap();
        storage.store(&seeded, &path).unwrap();

        let mut req = request();
        req.mode = DownloadMode::Fill;
        req.to = Some(day(20));
        req.limit = 10;
        let run = |req: &AggregateRequest| {
            aggregate(
                req,
                &ThreeDays { fail: true },
                &storage,
                &path,
                &MergeEngine::new(&Silent),
                &CancelToken::new(),
            )
        };

        // The gap fetch brings the 2nd and 3rd, then the 4th fails.
        let err = run(&req).unwrap_err();
        assert!(matches!(err, AggregateError::Source { from, .. } if from == day(4)), "{err}");
        assert_eq!(storage.extract(&path).unwrap().unwrap().point_count(), 2);

        req.keep_partial = true;
        run(&req).unwrap_err();
        let partial = storage.extract(&path).unwrap().unwrap();
        assert_eq!(partial.point_count(), 4);
        // The unfetched tail up to the 20th is not claimed.
        let flow = partial.flow_by_name("KRAKEN_SPOT_BTC_USD", interval).unwrap();
        assert_eq!((flow.start(), flow.end()), (Some(day(1)), Some(day(5))));
    }

    #[test]
    fn unresolvable_symbol_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request();
        req.base = "NOPE".into();

        let err = aggregate(
            &req,
            &ThreeDays { fail: false },
            &TransparentFormat::new(),
            &dir.path().join("set.dat"),
            &MergeEngine::new(&Silent),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, AggregateError::Resolve { .. }));
        assert!(err.to_string().contains("NOPE/USD on KRAKEN"));
    }

    #[test]
    fn rejects_unstorable_path() {
        let err = aggregate(
            &request(),
            &ThreeDays { fail: false },
            &TransparentFormat::new(),
            Path::new("out.csv"),
            &MergeEngine::new(&Silent),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, AggregateError::InvalidRequest(_)));
    }
}
