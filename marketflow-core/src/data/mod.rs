//! Data sources: the remote source seam, the CoinAPI client, and ingestion
//! of delimited files.

pub mod circuit_breaker;
pub mod coinapi;
pub mod ingest;
pub mod layout;
pub mod provider;
pub mod timestamp;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use coinapi::CoinApiSource;
pub use ingest::{ingest_into, IngestError, IngestFilter, IngestReader, IngestRow, IngestSummary, IngestTarget};
pub use layout::{detect_layout, ColumnMatcher, ColumnSpec, LayoutPreset, TabularLayout};
pub use provider::{MarketDataSource, ResolvedSymbol, SourceError, SourcePoint};
pub use timestamp::{parse_user_time, TimestampError, TimestampFormat};
