//! Per-symbol indicator snapshot.
//!
//! Each field is computed independently; a shortage of history for one
//! indicator leaves that field `None` and never fails the snapshot.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::candle::Candle;
use crate::domain::indicator::{bollinger, macd, rsi, stochastic_rsi, IndicatorError};

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub stoch_rsi_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        IndicatorParams {
            rsi_period: super::rsi::DEFAULT_PERIOD,
            macd_fast: super::macd::DEFAULT_FAST,
            macd_slow: super::macd::DEFAULT_SLOW,
            macd_signal: super::macd::DEFAULT_SIGNAL,
            bollinger_period: super::bollinger::DEFAULT_PERIOD,
            bollinger_k: super::bollinger::DEFAULT_MULTIPLIER,
            stoch_rsi_period: super::rsi::DEFAULT_PERIOD,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub as_of: Option<DateTime<Utc>>,
    pub last_close: Option<f64>,
    pub rsi: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_mid: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub stoch_rsi: Option<f64>,
}

impl IndicatorSnapshot {
    /// Number of indicator fields present.
    pub fn populated(&self) -> usize {
        [
            self.rsi,
            self.macd_line,
            self.bollinger_mid,
            self.stoch_rsi,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count()
    }
}

fn keep<T>(symbol: &str, result: Result<T, IndicatorError>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(symbol, reason = %e, "indicator omitted from snapshot");
            None
        }
    }
}

pub fn compute_snapshot(
    symbol: &str,
    candles: &[Candle],
    params: &IndicatorParams,
) -> IndicatorSnapshot {
    let last = candles.last();
    let macd_value = keep(
        symbol,
        macd(candles, params.macd_fast, params.macd_slow, params.macd_signal),
    );
    let bands = keep(
        symbol,
        bollinger(candles, params.bollinger_period, params.bollinger_k),
    );

    IndicatorSnapshot {
        symbol: symbol.to_string(),
        as_of: last.map(|c| c.timestamp),
        last_close: last.map(|c| c.close),
        rsi: keep(symbol, rsi(candles, params.rsi_period)),
        macd_line: macd_value.map(|m| m.line),
        macd_signal: macd_value.map(|m| m.signal),
        macd_histogram: macd_value.map(|m| m.histogram),
        bollinger_upper: bands.map(|b| b.upper),
        bollinger_mid: bands.map(|b| b.middle),
        bollinger_lower: bands.map(|b| b.lower),
        stoch_rsi: keep(symbol, stochastic_rsi(candles, params.stoch_rsi_period)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn make_candles(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = 100.0 + ((i * 5) % 9) as f64;
                Candle {
                    symbol: "TEST".into(),
                    timestamp: start + Duration::days(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    #[test]
    fn full_history_populates_every_field() {
        let snap = compute_snapshot("TEST", &make_candles(60), &IndicatorParams::default());
        assert_eq!(snap.populated(), 4);
        assert!(snap.macd_signal.is_some());
        assert!(snap.macd_histogram.is_some());
        assert!(snap.bollinger_upper.is_some() && snap.bollinger_lower.is_some());
        assert_eq!(snap.last_close, Some(100.0 + ((59 * 5) % 9) as f64));
    }

    #[test]
    fn short_history_degrades_field_by_field() {
        // 20 candles: RSI(14) and Bollinger(20) work, MACD and StochRSI do not.
        let snap = compute_snapshot("TEST", &make_candles(20), &IndicatorParams::default());
        assert!(snap.rsi.is_some());
        assert!(snap.bollinger_mid.is_some());
        assert!(snap.macd_line.is_none());
        assert!(snap.stoch_rsi.is_none());
        assert_eq!(snap.populated(), 2);
    }

    #[test]
    fn empty_history_is_empty_snapshot() {
        let snap = compute_snapshot("TEST", &[], &IndicatorParams::default());
        assert_eq!(snap.populated(), 0);
        assert!(snap.as_of.is_none());
        assert_eq!(snap.symbol, "TEST");
    }
}
