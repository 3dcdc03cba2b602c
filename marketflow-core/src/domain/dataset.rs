//! Dataset: the aggregate root persisted as one file.
//!
//! A dataset owns its index (terms plus symbol metadata) and, per symbol,
//! one flow per interval. Public accessors are read-only; new datasets are
//! produced by the merge engine's builder or by pruning.

use super::flow::{FlowError, MarketFlow};
use super::ids::TermId;
use super::index::{DatasetIndex, IndexError};
use super::interval::Interval;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Flows of one symbol, at most one per interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolIntervalGroup {
    #[serde(with = "flow_seq")]
    flows: BTreeMap<Interval, MarketFlow>,
}

impl SymbolIntervalGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, interval: Interval) -> Option<&MarketFlow> {
        self.flows.get(&interval)
    }

    pub(crate) fn take(&mut self, interval: Interval) -> Option<MarketFlow> {
        self.flows.remove(&interval)
    }

    /// Insert a flow, replacing any flow with the same interval.
    pub(crate) fn put(&mut self, flow: MarketFlow) -> Option<MarketFlow> {
        self.flows.insert(flow.interval(), flow)
    }

    pub(crate) fn flows_mut(&mut self) -> &mut BTreeMap<Interval, MarketFlow> {
        &mut self.flows
    }

    pub fn intervals(&self) -> impl Iterator<Item = Interval> + '_ {
        self.flows.keys().copied()
    }

    pub fn flows(&self) -> impl Iterator<Item = &MarketFlow> + '_ {
        self.flows.values()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

/// Structural problems found when loading a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasetError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("flow {interval} of symbol {symbol}: {source}")]
    Flow {
        symbol: TermId,
        interval: Interval,
        #[source]
        source: FlowError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    index: DatasetIndex,
    data: BTreeMap<TermId, SymbolIntervalGroup>,
}

impl Dataset {
    /// A dataset with no terms and no data.
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        index: DatasetIndex,
        data: BTreeMap<TermId, SymbolIntervalGroup>,
    ) -> Self {
        Self { index, data }
    }

    pub(crate) fn into_parts(self) -> (DatasetIndex, BTreeMap<TermId, SymbolIntervalGroup>) {
        (self.index, self.data)
    }

    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    pub fn data(&self) -> &BTreeMap<TermId, SymbolIntervalGroup> {
        &self.data
    }

    pub fn group(&self, symbol: TermId) -> Option<&SymbolIntervalGroup> {
        self.data.get(&symbol)
    }

    pub fn flow(&self, symbol: TermId, interval: Interval) -> Option<&MarketFlow> {
        self.group(symbol)?.get(interval)
    }

    /// Flow lookup by symbol name.
    pub fn flow_by_name(&self, symbol: &str, interval: Interval) -> Option<&MarketFlow> {
        self.flow(self.index.symbol_id(symbol)?, interval)
    }

    pub fn is_empty(&self) -> bool {
        self.index.terms().is_empty() && self.data.is_empty()
    }

    /// Total stored points across all flows.
    pub fn point_count(&self) -> usize {
        self.data
            .values()
            .flat_map(|group| group.flows())
            .map(MarketFlow::len)
            .sum()
    }

    /// Check every structural invariant: metadata references resolve, data
    /// only exists for known symbols, and each flow's bounds contain its
    /// points.
    pub fn validate(&self) -> Result<(), DatasetError> {
        self.index.validate()?;
        for (symbol, group) in &self.data {
            if self.index.metadata(*symbol).is_none() {
                return Err(IndexError::OrphanedData(*symbol).into());
            }
            for flow in group.flows() {
                flow.validate().map_err(|source| DatasetError::Flow {
                    symbol: *symbol,
                    interval: flow.interval(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

/// Flows are stored as a sequence; each carries its own interval key.
mod flow_seq {
    use super::{Interval, MarketFlow};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(flows: &BTreeMap<Interval, MarketFlow>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(flows.values())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<Interval, MarketFlow>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let flows = Vec::<MarketFlow>::deserialize(deserializer)?;
        let mut by_interval = BTreeMap::new();
        for flow in flows {
            let interval = flow.interval();
            if by_interval.insert(interval, flow).is_some() {
                return Err(serde::de::Error::custom(format!(
                    "duplicate flow for interval {interval}"
                )));
            }
        }
        Ok(by_interval)
    }
}
