//! CoinAPI market data source.
//!
//! Resolves spot symbols through `GET symbols` and fetches OHLCV history
//! through `GET ohlcv/{symbol_id}/history`. Handles rate limiting, retries
//! with exponential backoff plus jitter, status code mapping and the circuit
//! breaker.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{MarketDataSource, ResolvedSymbol, SourceError, SourcePoint};
use crate::config::SourceConfig;
use crate::diagnostics::Diagnostics;
use crate::domain::{Denomination, Interval};
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const API_KEY_HEADER: &str = "X-CoinAPI-Key";
const NO_DATA_STATUS: u16 = 550;
const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Entry from `GET symbols`.
#[derive(Debug, Deserialize)]
struct SymbolRecord {
    symbol_id: String,
    exchange_id: String,
    #[serde(default)]
    symbol_type: Option<String>,
    asset_id_base: String,
    asset_id_quote: String,
}

/// Entry from `GET ohlcv/{symbol_id}/history`.
#[derive(Debug, Deserialize)]
struct HistoricalRecord {
    time_period_start: DateTime<Utc>,
    price_open: f64,
    price_high: f64,
    price_low: f64,
    price_close: f64,
    volume_traded: f64,
    #[serde(default)]
    trades_count: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// CoinAPI REST client.
pub struct CoinApiSource {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
    diagnostics: Arc<dyn Diagnostics>,
}

impl CoinApiSource {
    pub fn new(
        api_key: impl Into<String>,
        config: &SourceConfig,
        circuit_breaker: Arc<CircuitBreaker>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("marketflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.endpoint(),
            api_key: api_key.into(),
            circuit_breaker,
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
            diagnostics,
        })
    }

    /// Whether CoinAPI offers OHLCV history at this interval.
    pub fn supports(interval: Interval) -> bool {
        let n = interval.length();
        match interval.denomination() {
            Denomination::Seconds | Denomination::Minutes => {
                matches!(n, 1..=6 | 10 | 15 | 20 | 30)
            }
            Denomination::Hours => matches!(n, 1..=4 | 6 | 12),
            Denomination::Days => matches!(n, 1..=3 | 5 | 7 | 10),
            Denomination::Months => matches!(n, 1..=4 | 6),
            Denomination::Years => matches!(n, 1..=5),
        }
    }

    /// CoinAPI's own symbol id for a spot pair.
    pub fn guess_symbol_id(exchange: &str, base: &str, quote: &str) -> String {
        format!(
            "{}_SPOT_{}_{}",
            exchange.to_uppercase(),
            base.to_uppercase(),
            quote.to_uppercase()
        )
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1));
        let jitter_cap = (self.base_delay.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        exponential + Duration::from_millis(jitter)
    }

    /// GET `path` with retry and circuit breaker logic, decoding JSON.
    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(SourceError::CircuitBreakerTripped);
        }

        let url = format!("{}{}", self.base_url, path);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.backoff(attempt));
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(SourceError::CircuitBreakerTripped);
            }

            let response = self
                .client
                .get(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .query(query)
                .send();

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        let decoded = resp.json::<T>().map_err(|e| {
                            SourceError::ResponseFormatChanged(format!(
                                "failed to parse response from {path}: {e}"
                            ))
                        })?;
                        self.circuit_breaker.record_success();
                        return Ok(decoded);
                    }

                    let retry_after = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(60);
                    let body = resp.text().unwrap_or_default();
                    let error = classify_status(status, &body, retry_after);

                    if matches!(error, SourceError::Forbidden(_)) {
                        // Key blocked: stop hammering the provider.
                        self.circuit_breaker.trip();
                        return Err(error);
                    }
                    if !matches!(error, SourceError::RateLimited { .. } | SourceError::Other(_)) {
                        return Err(error);
                    }
                    self.circuit_breaker.record_failure();
                    self.diagnostics
                        .status(&format!("Attempt {} on {path} failed: {error}", attempt + 1));
                    last_error = Some(error);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(SourceError::NetworkUnreachable(e.to_string()));
                }
                Err(e) => return Err(SourceError::NetworkUnreachable(e.to_string())),
            }
        }

        Err(last_error.unwrap_or_else(|| SourceError::Other("max retries exceeded".into())))
    }
}

/// Map a non-success HTTP status to a source error.
fn classify_status(status: StatusCode, body: &str, retry_after_secs: u64) -> SourceError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::BAD_REQUEST => SourceError::BadRequest(message),
        StatusCode::UNAUTHORIZED => SourceError::Unauthorized(message),
        StatusCode::FORBIDDEN => SourceError::Forbidden(message),
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited { retry_after_secs },
        s if s.as_u16() == NO_DATA_STATUS => SourceError::NoData(message),
        s => SourceError::Other(format!("HTTP {s}: {message}")),
    }
}

fn to_point(record: HistoricalRecord) -> SourcePoint {
    SourcePoint {
        time: record.time_period_start.naive_utc(),
        open: record.price_open,
        high: record.price_high,
        low: record.price_low,
        close: record.price_close,
        volume: record.volume_traded,
        trades: record.trades_count,
    }
}

impl MarketDataSource for CoinApiSource {
    fn name(&self) -> &str {
        "coinapi"
    }

    fn limit_request_factor(&self) -> usize {
        100
    }

    fn to_source_notation(&self, interval: Interval) -> Result<String, SourceError> {
        if Self::supports(interval) {
            Ok(interval.notation())
        } else {
            Err(SourceError::UnsupportedInterval(interval))
        }
    }

    fn resolve_symbol(
        &self,
        exchange: &str,
        base: &str,
        quote: &str,
    ) -> Result<ResolvedSymbol, SourceError> {
        let guess = Self::guess_symbol_id(exchange, base, quote);
        let records: Vec<SymbolRecord> =
            self.get_json("symbols", &[("filter_symbol_id", guess.clone())])?;

        if records.len() > 1 {
            self.diagnostics.warn(&format!(
                "Multiple symbol results were received for {guess}. The first one will be used, \
                 which may not be the desired behavior."
            ));
        }

        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::SymbolNotFound {
                exchange: exchange.to_string(),
                base: base.to_string(),
                quote: quote.to_string(),
            })?;

        if let Some(kind) = record.symbol_type.as_deref() {
            if !kind.eq_ignore_ascii_case("SPOT") {
                self.diagnostics
                    .warn(&format!("Symbol {} is reported as {kind}, not SPOT", record.symbol_id));
            }
        }

        Ok(ResolvedSymbol {
            symbol_id: record.symbol_id,
            base: record.asset_id_base,
            quote: record.asset_id_quote,
            exchange: record.exchange_id,
        })
    }

    fn fetch_historical(
        &self,
        symbol_id: &str,
        interval_notation: &str,
        from: NaiveDateTime,
        to: Option<NaiveDateTime>,
        limit: Option<usize>,
    ) -> Result<Vec<SourcePoint>, SourceError> {
        let mut query = vec![
            ("period_id", interval_notation.to_string()),
            ("time_start", from.format(QUERY_TIME_FORMAT).to_string()),
        ];
        if let Some(to) = to {
            query.push(("time_end", to.format(QUERY_TIME_FORMAT).to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let records: Vec<HistoricalRecord> =
            self.get_json(&format!("ohlcv/{symbol_id}/history"), &query)?;
        let mut points: Vec<SourcePoint> = records.into_iter().map(to_point).collect();
        points.sort_by_key(|p| p.time);
        Ok(points)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
