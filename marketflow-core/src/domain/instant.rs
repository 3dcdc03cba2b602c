//! MarketInstant: one OHLCV observation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A single OHLCV observation.
///
/// `time` is optional: an instant without a timestamp cannot be ordered and
/// is rejected when upserted into a flow, as is one carrying a NaN or
/// infinite value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketInstant {
    pub time: Option<NaiveDateTime>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl MarketInstant {
    pub fn new(time: NaiveDateTime, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time: Some(time),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// A flat observation: all four prices equal.
    pub fn flat(time: NaiveDateTime, price: f64, volume: f64) -> Self {
        Self::new(time, price, price, price, price, volume)
    }

    pub fn is_timed(&self) -> bool {
        self.time.is_some()
    }

    /// Whether every price and the volume are finite numbers.
    pub fn is_finite(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|value| value.is_finite())
    }
}
