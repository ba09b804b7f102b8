//! Market data access port.

use rust_decimal::Decimal;

use crate::domain::candle::Candle;
use crate::domain::error::PapertrailError;

/// Source of candle history and latest quotes.
///
/// Implementations return `DataUnavailable` for anything they cannot serve.
/// Calls may block; callers never hold an account lock across them.
pub trait MarketDataFeed: Send + Sync {
    /// Up to `lookback` most recent candles at `interval`, oldest first.
    fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        lookback: usize,
    ) -> Result<Vec<Candle>, PapertrailError>;

    fn get_latest_price(&self, symbol: &str) -> Result<Decimal, PapertrailError>;
}
