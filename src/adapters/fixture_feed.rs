//! Deterministic in-memory feed with scripted failures.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::Duration;

use crate::domain::candle::Candle;
use crate::domain::error::PapertrailError;
use crate::ports::market_data_port::MarketDataFeed;

/// Serves fixed candle series and quotes.
///
/// Unknown symbols have no history (empty series) and no quote. Symbols can
/// be scripted to fail a number of times, fail permanently, or respond
/// slowly. Every `get_candles` call is counted per symbol.
#[derive(Default)]
pub struct FixtureFeed {
    candles: HashMap<String, Vec<Candle>>,
    quotes: HashMap<String, Decimal>,
    unavailable: HashSet<String>,
    delay: Option<Duration>,
    transient_failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FixtureFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candles(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.candles.insert(symbol.to_uppercase(), candles);
        self
    }

    pub fn with_quote(mut self, symbol: &str, price: Decimal) -> Self {
        self.quotes.insert(symbol.to_uppercase(), price);
        self
    }

    /// Fail every call for `symbol` with `DataUnavailable`.
    pub fn with_unavailable(mut self, symbol: &str) -> Self {
        self.unavailable.insert(symbol.to_uppercase());
        self
    }

    /// Fail the next `count` candle requests for `symbol`, then recover.
    pub fn with_transient_failures(self, symbol: &str, count: u32) -> Self {
        self.transient_failures
            .lock()
            .insert(symbol.to_uppercase(), count);
        self
    }

    /// Sleep this long on every candle request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `get_candles` calls made for `symbol`.
    pub fn calls(&self, symbol: &str) -> usize {
        self.calls
            .lock()
            .get(&symbol.to_uppercase())
            .copied()
            .unwrap_or(0)
    }
}

impl MarketDataFeed for FixtureFeed {
    fn get_candles(
        &self,
        symbol: &str,
        _interval: &str,
        lookback: usize,
    ) -> Result<Vec<Candle>, PapertrailError> {
        let key = symbol.to_uppercase();
        *self.calls.lock().entry(key.clone()).or_insert(0) += 1;

        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.unavailable.contains(&key) {
            return Err(PapertrailError::data_unavailable(symbol, "fixture: unavailable"));
        }
        if let Some(remaining) = self.transient_failures.lock().get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PapertrailError::data_unavailable(symbol, "fixture: transient failure"));
            }
        }

        let series = self.candles.get(&key).map(Vec::as_slice).unwrap_or(&[]);
        let start = series.len().saturating_sub(lookback);
        Ok(series[start..].to_vec())
    }

    fn get_latest_price(&self, symbol: &str) -> Result<Decimal, PapertrailError> {
        let key = symbol.to_uppercase();
        if self.unavailable.contains(&key) {
            return Err(PapertrailError::data_unavailable(symbol, "fixture: unavailable"));
        }
        self.quotes
            .get(&key)
            .copied()
            .ok_or_else(|| PapertrailError::data_unavailable(symbol, "fixture: no quote"))
    }
}
