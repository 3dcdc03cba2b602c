//! Domain model: terms, intervals, instants, flows and datasets.

pub mod dataset;
pub mod flow;
pub mod ids;
pub mod index;
pub mod instant;
pub mod interval;

pub use dataset::{Dataset, DatasetError, SymbolIntervalGroup};
pub use flow::{FlowError, MarketFlow, TimeRange, UpsertReport};
pub use ids::TermId;
pub use index::{DatasetIndex, IndexError, SymbolMetadata, SymbolType, TermIndex, TermRole};
pub use instant::MarketInstant;
pub use interval::{parse_interval, Denomination, Interval, IntervalError};
