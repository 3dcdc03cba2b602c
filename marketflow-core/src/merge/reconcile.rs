//! Symbol resolution and metadata reconciliation.

use super::MergeError;
use crate::diagnostics::Diagnostics;
use crate::domain::{DatasetIndex, SymbolMetadata, SymbolType, TermId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What to do when stored symbol metadata disagrees with a new resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcilePolicy {
    /// Overwrite the stored metadata and warn. Upstream renames heal
    /// themselves without halting aggregation.
    #[default]
    SelfHealing,
    /// Refuse the merge.
    Strict,
}

impl fmt::Display for ReconcilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcilePolicy::SelfHealing => f.write_str("self-healing"),
            ReconcilePolicy::Strict => f.write_str("strict"),
        }
    }
}

impl FromStr for ReconcilePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "self-healing" | "selfhealing" | "heal" => Ok(ReconcilePolicy::SelfHealing),
            "strict" => Ok(ReconcilePolicy::Strict),
            other => Err(format!(
                "unknown reconcile policy '{other}' (expected self-healing or strict)"
            )),
        }
    }
}

/// Names identifying one spot symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolKey {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub exchange: String,
}

impl SymbolKey {
    pub fn new(
        symbol: impl Into<String>,
        base: impl Into<String>,
        quote: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            base: base.into(),
            quote: quote.into(),
            exchange: exchange.into(),
        }
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{} on {})", self.symbol, self.base, self.quote, self.exchange)
    }
}

/// Resolve the terms of `key` and make the symbol's metadata agree with it.
///
/// Returns the symbol's id. Under [`ReconcilePolicy::SelfHealing`] a
/// disagreeing or non-spot record is overwritten with a warning; under
/// [`ReconcilePolicy::Strict`] it is an error. On error `index` may already
/// hold the newly resolved terms, so callers reconcile against a copy.
pub fn reconcile(
    index: &mut DatasetIndex,
    key: &SymbolKey,
    policy: ReconcilePolicy,
    diagnostics: &dyn Diagnostics,
) -> Result<TermId, MergeError> {
    let symbol = index.terms.resolve(&key.symbol);
    let base = index.terms.resolve(&key.base);
    let quote = index.terms.resolve(&key.quote);
    let exchange = index.terms.resolve(&key.exchange);
    let wanted = SymbolMetadata::spot(base, quote, exchange);

    let Some(stored) = index.symbols.get(&symbol).copied() else {
        index.symbols.insert(symbol, wanted);
        return Ok(symbol);
    };
    if stored == wanted {
        return Ok(symbol);
    }

    match policy {
        ReconcilePolicy::Strict if stored.kind != SymbolType::Spot => {
            return Err(MergeError::UnsupportedSymbolType {
                symbol: key.symbol.clone(),
                kind: stored.kind,
            });
        }
        ReconcilePolicy::Strict => {
            return Err(MergeError::MetadataConflict {
                symbol: key.symbol.clone(),
                stored: describe(index, &stored),
                resolved: describe(index, &wanted),
            });
        }
        ReconcilePolicy::SelfHealing => {}
    }

    diagnostics.warn(&format!(
        "Symbol metadata of {} changed from {} to {}; overwriting",
        key.symbol,
        describe(index, &stored),
        describe(index, &wanted),
    ));
    index.symbols.insert(symbol, wanted);

    // The old record may have been the last user of some terms.
    for candidate in [stored.held_asset, stored.traded_asset, stored.exchange] {
        if !index.is_referenced(candidate) {
            index.terms.remove(candidate);
        }
    }
    Ok(symbol)
}

fn describe(index: &DatasetIndex, metadata: &SymbolMetadata) -> String {
    let name = |id| index.terms.lookup(id).unwrap_or("?").to_string();
    format!(
        "{} {}/{} on {}",
        metadata.kind,
        name(metadata.traded_asset),
        name(metadata.held_asset),
        name(metadata.exchange)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{RecordingDiagnostics, Silent};

    fn btcusd_on(exchange: &str) -> SymbolKey {
        SymbolKey::new("BTCUSD", "BTC", "USD", exchange)
    }

    #[test]
    fn first_resolution_creates_spot_metadata() {
        let mut index = DatasetIndex::new();
        let id = reconcile(&mut index, &btcusd_on("X"), ReconcilePolicy::default(), &Silent).unwrap();

        let metadata = index.metadata(id).unwrap();
        assert_eq!(metadata.kind, SymbolType::Spot);
        assert_eq!(index.terms().lookup(metadata.traded_asset).unwrap(), "BTC");
        assert_eq!(index.terms().lookup(metadata.held_asset).unwrap(), "USD");
        assert_eq!(index.terms().lookup(metadata.exchange).unwrap(), "X");
    }

    #[test]
    fn matching_metadata_is_a_no_op() {
        let diag = RecordingDiagnostics::new();
        let mut index = DatasetIndex::new();
        reconcile(&mut index, &btcusd_on("X"), ReconcilePolicy::default(), &diag).unwrap();
        let before = index.clone();
        reconcile(&mut index, &btcusd_on("X"), ReconcilePolicy::default(), &diag).unwrap();

        assert_eq!(index, before);
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn self_healing_overwrites_exchange_and_warns() {
        let diag = RecordingDiagnostics::new();
        let mut index = DatasetIndex::new();
        let first = reconcile(&mut index, &btcusd_on("X"), ReconcilePolicy::SelfHealing, &diag).unwrap();
        let second = reconcile(&mut index, &btcusd_on("Y"), ReconcilePolicy::SelfHealing, &diag).unwrap();

        assert_eq!(first, second);
        let exchange = index.metadata(second).unwrap().exchange;
        assert_eq!(index.terms().lookup(exchange).unwrap(), "Y");
        assert_eq!(diag.warnings().len(), 1);
        assert_eq!(index.terms().id_of("X"), None, "unused exchange collected");
    }

    #[test]
    fn self_healing_repairs_non_spot_type() {
        let mut index = DatasetIndex::new();
        let id = reconcile(&mut index, &btcusd_on("X"), ReconcilePolicy::SelfHealing, &Silent).unwrap();
        index.symbols.get_mut(&id).unwrap().kind = SymbolType::Futures;

        reconcile(&mut index, &btcusd_on("X"), ReconcilePolicy::SelfHealing, &Silent).unwrap();
        assert_eq!(index.metadata(id).unwrap().kind, SymbolType::Spot);
    }

    #[test]
    fn strict_rejects_conflicts() {
        let mut index = DatasetIndex::new();
        let id = reconcile(&mut index, &btcusd_on("X"), ReconcilePolicy::Strict, &Silent).unwrap();

        let err = reconcile(&mut index, &btcusd_on("Y"), ReconcilePolicy::Strict, &Silent).unwrap_err();
        assert!(matches!(err, MergeError::MetadataConflict { .. }));

        index.symbols.get_mut(&id).unwrap().kind = SymbolType::Perpetual;
        let err = reconcile(&mut index, &btcusd_on("X"), ReconcilePolicy::Strict, &Silent).unwrap_err();
        assert!(matches!(
            err,
            MergeError::UnsupportedSymbolType { kind: SymbolType::Perpetual, .. }
        ));
    }

    #[test]
    fn policy_parses_from_text() {
        assert_eq!("strict".parse::<ReconcilePolicy>().unwrap(), ReconcilePolicy::Strict);
        assert_eq!(
            "Self-Healing".parse::<ReconcilePolicy>().unwrap(),
            ReconcilePolicy::SelfHealing
        );
        assert!("lenient".parse::<ReconcilePolicy>().is_err());
    }
}
