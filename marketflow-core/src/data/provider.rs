//! Remote market data source trait and structured error types.
//!
//! The MarketDataSource trait abstracts over remote OHLCV APIs so the
//! scheduler can be driven by CoinAPI in production and by a scripted source
//! in tests.

use crate::domain::{Interval, MarketInstant};
use crate::merge::SymbolKey;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured errors from a remote source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("the request was invalid (HTTP 400): {0}")]
    BadRequest(String),

    #[error("the API key was incorrect (HTTP 401): {0}")]
    Unauthorized(String),

    #[error("the API key doesn't have permission for the requested resource (HTTP 403): {0}")]
    Forbidden(String),

    #[error("no data was available: {0}")]
    NoData(String),

    #[error("no symbol found for {base}/{quote} on {exchange}")]
    SymbolNotFound {
        exchange: String,
        base: String,
        quote: String,
    },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("interval {0} is not offered by this source")]
    UnsupportedInterval(Interval),

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("source error: {0}")]
    Other(String),
}

/// A symbol as the source knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSymbol {
    pub symbol_id: String,
    pub base: String,
    pub quote: String,
    pub exchange: String,
}

impl ResolvedSymbol {
    /// Names under which this symbol is indexed in a dataset.
    pub fn key(&self) -> SymbolKey {
        SymbolKey::new(&self.symbol_id, &self.base, &self.quote, &self.exchange)
    }
}

/// One historical OHLCV period as returned by a source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourcePoint {
    pub time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades: u64,
}

impl From<SourcePoint> for MarketInstant {
    fn from(point: SourcePoint) -> Self {
        MarketInstant::new(point.time, point.open, point.high, point.low, point.close, point.volume)
    }
}

/// Trait for remote OHLCV sources.
///
/// Implementations are blocking. Retry and rate-limit handling live inside
/// the implementation; callers see one result per call.
pub trait MarketDataSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Page sizes must be multiples of this value.
    fn limit_request_factor(&self) -> usize;

    /// The source's own notation for an interval.
    fn to_source_notation(&self, interval: Interval) -> Result<String, SourceError>;

    /// Find the source's symbol for a base/quote pair on an exchange.
    fn resolve_symbol(
        &self,
        exchange: &str,
        base: &str,
        quote: &str,
    ) -> Result<ResolvedSymbol, SourceError>;

    /// Historical periods starting at `from`, in ascending time order.
    fn fetch_historical(
        &self,
        symbol_id: &str,
        interval_notation: &str,
        from: NaiveDateTime,
        to: Option<NaiveDateTime>,
        limit: Option<usize>,
    ) -> Result<Vec<SourcePoint>, SourceError>;

    /// Whether requests are currently allowed (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}
