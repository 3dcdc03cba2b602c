//! Builder-with-commit: stage changes on a copy, then seal a new dataset.

use super::reconcile::{reconcile, ReconcilePolicy, SymbolKey};
use super::MergeError;
use crate::diagnostics::Diagnostics;
use crate::domain::{Dataset, DatasetIndex, Interval, MarketFlow, SymbolIntervalGroup, TermId};
use std::collections::BTreeMap;

/// Pending changes against an immutable base dataset.
///
/// Dropping the builder discards everything; [`DatasetBuilder::commit`]
/// produces the new dataset.
pub struct DatasetBuilder<'d> {
    index: DatasetIndex,
    data: BTreeMap<TermId, SymbolIntervalGroup>,
    policy: ReconcilePolicy,
    diagnostics: &'d dyn Diagnostics,
}

impl<'d> DatasetBuilder<'d> {
    pub fn from_base(base: &Dataset, diagnostics: &'d dyn Diagnostics) -> Self {
        let (index, data) = base.clone().into_parts();
        Self {
            index,
            data,
            policy: ReconcilePolicy::default(),
            diagnostics,
        }
    }

    pub fn empty(diagnostics: &'d dyn Diagnostics) -> Self {
        Self::from_base(&Dataset::empty(), diagnostics)
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    /// Resolve the symbol's terms and reconcile its metadata.
    pub fn reconcile_symbol(&mut self, key: &SymbolKey) -> Result<TermId, MergeError> {
        reconcile(&mut self.index, key, self.policy, self.diagnostics)
    }

    /// Detach the flow for `(symbol, interval)`, or a fresh empty one.
    pub fn take_flow(&mut self, symbol: TermId, interval: Interval) -> MarketFlow {
        self.data
            .get_mut(&symbol)
            .and_then(|group| group.take(interval))
            .unwrap_or_else(|| MarketFlow::new(interval))
    }

    /// Attach a flow, replacing the one for the same interval.
    pub fn put_flow(&mut self, symbol: TermId, flow: MarketFlow) {
        self.data.entry(symbol).or_default().put(flow);
    }

    pub fn remove_flow(&mut self, symbol: TermId, interval: Interval) -> Option<MarketFlow> {
        let group = self.data.get_mut(&symbol)?;
        let removed = group.take(interval);
        if group.is_empty() {
            self.data.remove(&symbol);
        }
        removed
    }

    /// Remove a symbol's data and metadata, collecting unused terms.
    pub fn remove_symbol(&mut self, symbol: TermId) {
        self.data.remove(&symbol);
        self.index.remove_symbol(symbol);
    }

    pub(crate) fn groups_mut(&mut self) -> &mut BTreeMap<TermId, SymbolIntervalGroup> {
        &mut self.data
    }

    /// Seal the staged state into a new dataset. Empty groups are dropped.
    pub fn commit(mut self) -> Dataset {
        self.data.retain(|_, group| !group.is_empty());
        Dataset::from_parts(self.index, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Silent;
    use crate::domain::MarketInstant;
    use chrono::NaiveDate;

    #[test]
    fn base_is_untouched_until_commit() {
        let base = Dataset::empty();
        let mut builder = DatasetBuilder::from_base(&base, &Silent);
        let id = builder
            .reconcile_symbol(&SymbolKey::new("ETHEUR", "ETH", "EUR", "KRAKEN"))
            .unwrap();
        let mut flow = builder.take_flow(id, Interval::hours(1).unwrap());
        let t = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();
        flow.upsert([MarketInstant::flat(t, 2500.0, 3.0)], &Silent);
        builder.put_flow(id, flow);

        assert!(base.is_empty());
        let committed = builder.commit();
        assert_eq!(committed.point_count(), 1);
    }

    #[test]
    fn commit_drops_empty_groups() {
        let mut builder = DatasetBuilder::empty(&Silent);
        let id = builder
            .reconcile_symbol(&SymbolKey::new("ETHEUR", "ETH", "EUR", "KRAKEN"))
            .unwrap();
        builder.put_flow(id, MarketFlow::new(Interval::days(1).unwrap()));
        builder.remove_flow(id, Interval::days(1).unwrap());

        let dataset = builder.commit();
        assert!(dataset.data().is_empty());
        assert!(dataset.index().metadata(id).is_some());
    }
}
