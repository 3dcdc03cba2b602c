//! Compact term identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index assigned to a term (symbol, asset or exchange name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermId(pub u32);

impl TermId {
    pub const FIRST: TermId = TermId(0);

    /// The identifier allocated after this one.
    pub fn successor(self) -> TermId {
        TermId(self.0.saturating_add(1))
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
