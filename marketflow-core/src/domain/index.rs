//! Term index and symbol metadata.
//!
//! Every symbol, asset and exchange name is mapped to a compact [`TermId`].
//! The mapping is injective; new ids are the current maximum plus one.
//! Symbol metadata refers to the asset and exchange terms by id.

use super::ids::TermId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("term index {0} is not assigned")]
    NotFound(TermId),

    #[error("term index {id} is assigned to both '{first}' and '{second}'")]
    DuplicateIndex {
        id: TermId,
        first: String,
        second: String,
    },

    #[error("symbol {symbol} refers to unknown term {missing}")]
    DanglingReference { symbol: TermId, missing: TermId },

    #[error("data is stored for symbol {0}, which has no metadata")]
    OrphanedData(TermId),
}

/// Bidirectional name <-> id mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, TermId>",
    into = "BTreeMap<String, TermId>"
)]
pub struct TermIndex {
    by_name: BTreeMap<String, TermId>,
    by_id: BTreeMap<TermId, String>,
}

impl TermIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `name`, allocating the next free id if the name is new.
    pub fn resolve(&mut self, name: &str) -> TermId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = self
            .by_id
            .keys()
            .next_back()
            .map_or(TermId::FIRST, |max| max.successor());
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, name.to_string());
        id
    }

    pub fn lookup(&self, id: TermId) -> Result<&str, IndexError> {
        self.by_id
            .get(&id)
            .map(String::as_str)
            .ok_or(IndexError::NotFound(id))
    }

    pub fn id_of(&self, name: &str) -> Option<TermId> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, id: TermId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn remove(&mut self, id: TermId) -> Option<String> {
        let name = self.by_id.remove(&id)?;
        self.by_name.remove(&name);
        Some(name)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Terms in id order.
    pub fn iter(&self) -> impl Iterator<Item = (TermId, &str)> + '_ {
        self.by_id.iter().map(|(id, name)| (*id, name.as_str()))
    }
}

impl TryFrom<BTreeMap<String, TermId>> for TermIndex {
    type Error = IndexError;

    fn try_from(by_name: BTreeMap<String, TermId>) -> Result<Self, Self::Error> {
        let mut by_id = BTreeMap::new();
        for (name, id) in &by_name {
            if let Some(first) = by_id.insert(*id, name.clone()) {
                return Err(IndexError::DuplicateIndex {
                    id: *id,
                    first,
                    second: name.clone(),
                });
            }
        }
        Ok(Self { by_name, by_id })
    }
}

impl From<TermIndex> for BTreeMap<String, TermId> {
    fn from(index: TermIndex) -> Self {
        index.by_name
    }
}

/// Market type of a symbol. Only spot symbols can carry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SymbolType {
    Spot,
    Futures,
    Option,
    Perpetual,
    Index,
    Credit,
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolType::Spot => "Spot",
            SymbolType::Futures => "Futures",
            SymbolType::Option => "Option",
            SymbolType::Perpetual => "Perpetual",
            SymbolType::Index => "Index",
            SymbolType::Credit => "Credit",
        };
        f.write_str(name)
    }
}

/// What a symbol trades: `traded_asset` priced in `held_asset` on `exchange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolMetadata {
    /// Quote asset.
    pub held_asset: TermId,
    /// Base asset.
    pub traded_asset: TermId,
    pub exchange: TermId,
    #[serde(rename = "type")]
    pub kind: SymbolType,
}

impl SymbolMetadata {
    pub fn spot(traded_asset: TermId, held_asset: TermId, exchange: TermId) -> Self {
        Self {
            held_asset,
            traded_asset,
            exchange,
            kind: SymbolType::Spot,
        }
    }

    fn references(&self, id: TermId) -> bool {
        self.held_asset == id || self.traded_asset == id || self.exchange == id
    }
}

/// How a term is used by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermRole {
    Symbol,
    Asset,
    Exchange,
    Unknown,
}

impl fmt::Display for TermRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TermRole::Symbol => "Symbol",
            TermRole::Asset => "Asset",
            TermRole::Exchange => "Exchange",
            TermRole::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Term index plus the metadata of every known symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetIndex {
    pub(crate) terms: TermIndex,
    pub(crate) symbols: BTreeMap<TermId, SymbolMetadata>,
}

impl DatasetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terms(&self) -> &TermIndex {
        &self.terms
    }

    pub fn symbols(&self) -> &BTreeMap<TermId, SymbolMetadata> {
        &self.symbols
    }

    pub fn metadata(&self, symbol: TermId) -> Option<&SymbolMetadata> {
        self.symbols.get(&symbol)
    }

    /// Id of a symbol by name, if the name is a known symbol.
    pub fn symbol_id(&self, name: &str) -> Option<TermId> {
        self.terms
            .id_of(name)
            .filter(|id| self.symbols.contains_key(id))
    }

    pub fn role(&self, id: TermId) -> TermRole {
        if self.symbols.contains_key(&id) {
            return TermRole::Symbol;
        }
        let mut role = TermRole::Unknown;
        for metadata in self.symbols.values() {
            if metadata.exchange == id {
                return TermRole::Exchange;
            }
            if metadata.held_asset == id || metadata.traded_asset == id {
                role = TermRole::Asset;
            }
        }
        role
    }

    /// Remove a symbol and garbage-collect the asset and exchange terms that
    /// no remaining symbol refers to.
    pub fn remove_symbol(&mut self, symbol: TermId) -> Option<SymbolMetadata> {
        let metadata = self.symbols.remove(&symbol)?;
        for candidate in [symbol, metadata.held_asset, metadata.traded_asset, metadata.exchange] {
            if !self.is_referenced(candidate) {
                self.terms.remove(candidate);
            }
        }
        Some(metadata)
    }

    /// True if `id` is a symbol or is referenced by any symbol's metadata.
    pub fn is_referenced(&self, id: TermId) -> bool {
        self.symbols.contains_key(&id) || self.symbols.values().any(|m| m.references(id))
    }

    /// Every metadata reference must point at an existing term.
    pub fn validate(&self) -> Result<(), IndexError> {
        for (symbol, metadata) in &self.symbols {
            for id in [*symbol, metadata.held_asset, metadata.traded_asset, metadata.exchange] {
                if !self.terms.contains(id) {
                    return Err(IndexError::DanglingReference {
                        symbol: *symbol,
                        missing: id,
                    });
                }
            }
        }
        Ok(())
    }
}
