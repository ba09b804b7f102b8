//! Candle (OHLCV aggregate) representation.

use chrono::{DateTime, Utc};

/// One interval's open/high/low/close/volume aggregate for a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Percentage change from `earlier` close to this candle's close.
    /// Returns `None` when the earlier close is not positive.
    pub fn pct_change_from(&self, earlier: &Candle) -> Option<f64> {
        if earlier.close <= 0.0 {
            return None;
        }
        Some((self.close - earlier.close) / earlier.close * 100.0)
    }
}
