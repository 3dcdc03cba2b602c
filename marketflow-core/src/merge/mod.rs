//! Dataset merge engine.
//!
//! A merge combines new points for one (symbol, interval) pair with a base
//! dataset and returns a new dataset:
//!
//! 1. reconcile the symbol's terms and metadata,
//! 2. detach the existing flow (or start an empty one),
//! 3. upsert the new points,
//! 4. widen the declared bounds,
//! 5. reattach the flow and commit.
//!
//! The base is never modified. Any failure discards the staged copy, so a
//! merge is all-or-nothing and retrying it with the same inputs against the
//! same base gives the same result.

pub mod builder;
pub mod reconcile;

pub use builder::DatasetBuilder;
pub use reconcile::{reconcile, ReconcilePolicy, SymbolKey};

use crate::diagnostics::Diagnostics;
use crate::domain::{
    Dataset, FlowError, Interval, IntervalError, MarketFlow, MarketInstant, SymbolType,
};
use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("symbol {symbol} is a {kind} symbol; only spot symbols can carry data")]
    UnsupportedSymbolType { symbol: String, kind: SymbolType },

    #[error("symbol {symbol} is stored as {stored} but was resolved as {resolved}")]
    MetadataConflict {
        symbol: String,
        stored: String,
        resolved: String,
    },

    #[error("{symbol} {interval}: {source}")]
    InvalidRange {
        symbol: String,
        interval: Interval,
        #[source]
        source: FlowError,
    },

    #[error(transparent)]
    Interval(#[from] IntervalError),
}

/// New points for one flow, with the coverage they claim.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    pub symbol: SymbolKey,
    pub interval: Interval,
    pub points: Vec<MarketInstant>,
    pub declared_start: Option<NaiveDateTime>,
    pub declared_end: Option<NaiveDateTime>,
}

impl MergeRequest {
    pub fn new(symbol: SymbolKey, interval: Interval, points: Vec<MarketInstant>) -> Self {
        Self {
            symbol,
            interval,
            points,
            declared_start: None,
            declared_end: None,
        }
    }

    pub fn declaring(mut self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        self.declared_start = start;
        self.declared_end = end;
        self
    }
}

/// Merge engine configured with a reconcile policy and a diagnostics sink.
#[derive(Clone, Copy)]
pub struct MergeEngine<'d> {
    policy: ReconcilePolicy,
    diagnostics: &'d dyn Diagnostics,
}

impl<'d> MergeEngine<'d> {
    pub fn new(diagnostics: &'d dyn Diagnostics) -> Self {
        Self {
            policy: ReconcilePolicy::default(),
            diagnostics,
        }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    pub fn diagnostics(&self) -> &'d dyn Diagnostics {
        self.diagnostics
    }

    /// Merge `request` into `base`, returning the new dataset.
    pub fn merge(&self, base: &Dataset, request: MergeRequest) -> Result<Dataset, MergeError> {
        let MergeRequest {
            symbol: key,
            interval,
            points,
            declared_start,
            declared_end,
        } = request;

        let mut builder = DatasetBuilder::from_base(base, self.diagnostics).with_policy(self.policy);
        let symbol = builder.reconcile_symbol(&key)?;
        let mut flow = builder.take_flow(symbol, interval);
        flow.upsert(points, self.diagnostics);
        flow.widen(declared_start, declared_end)
            .map_err(|source| MergeError::InvalidRange {
                symbol: key.symbol.clone(),
                interval,
                source,
            })?;
        builder.put_flow(symbol, flow);
        Ok(builder.commit())
    }
}

/// Merge with the default (self-healing) policy.
pub fn merge(
    base: &Dataset,
    request: MergeRequest,
    diagnostics: &dyn Diagnostics,
) -> Result<Dataset, MergeError> {
    MergeEngine::new(diagnostics).merge(base, request)
}

/// Declared bounds that include a requested range, the existing flow and the
/// incoming points.
///
/// A side with neither a requested nor an existing declared bound stays
/// undeclared. Otherwise the bound is stretched over every stored and
/// incoming point, so widening with it cannot fail.
pub fn covering_bounds(
    existing: Option<&MarketFlow>,
    requested_start: Option<NaiveDateTime>,
    requested_end: Option<NaiveDateTime>,
    incoming: &[MarketInstant],
) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
    let incoming_first = incoming.iter().filter_map(|p| p.time).min();
    let incoming_last = incoming.iter().filter_map(|p| p.time).max();
    let existing_start = existing.and_then(MarketFlow::start);
    let existing_end = existing.and_then(MarketFlow::end);

    let start = if requested_start.is_none() && existing_start.is_none() {
        None
    } else {
        [
            requested_start,
            existing_start,
            existing.and_then(MarketFlow::first_time),
            incoming_first,
        ]
        .into_iter()
        .flatten()
        .min()
    };
    let end = if requested_end.is_none() && existing_end.is_none() {
        None
    } else {
        [
            requested_end,
            existing_end,
            existing.and_then(MarketFlow::last_time),
            incoming_last,
        ]
        .into_iter()
        .flatten()
        .max()
    };
    (start, end)
}
