//! Shared test helpers: candle series and fixture feeds.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use papertrail::adapters::fixture_feed::FixtureFeed;
use papertrail::domain::candle::Candle;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn make_candle(symbol: &str, day: i64, close: f64, volume: f64) -> Candle {
    Candle {
        symbol: symbol.to_uppercase(),
        timestamp: start() + Duration::days(day),
        open: close,
        high: close * 1.01,
        low: close * 0.99,
        close,
        volume,
    }
}

/// Daily candles from parallel close and volume slices.
pub fn series(symbol: &str, closes: &[f64], volumes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .zip(volumes)
        .enumerate()
        .map(|(i, (&close, &volume))| make_candle(symbol, i as i64, close, volume))
        .collect()
}

/// 40 flat days at 100, then seven straight down days ending at 55 (a 45%
/// long-window decline) with a 2.5x volume surge on the last day.
pub fn crash_series(symbol: &str) -> Vec<Candle> {
    let mut closes = vec![100.0; 40];
    let mut volumes = vec![1000.0; 40];
    for k in 1..=7 {
        closes.push(100.0 * 0.55_f64.powf(k as f64 / 7.0));
        volumes.push(if k == 7 { 2500.0 } else { 1000.0 });
    }
    series(symbol, &closes, &volumes)
}

/// 40 flat days then a 1% uptick on ordinary volume.
pub fn calm_series(symbol: &str) -> Vec<Candle> {
    let mut closes = vec![100.0; 40];
    closes.push(101.0);
    series(symbol, &closes, &[1000.0; 41])
}

/// 25 days sliding from 100 to 76 with no volume spike: a moderate dip.
pub fn dip_series(symbol: &str) -> Vec<Candle> {
    let mut closes = vec![100.0; 20];
    for k in 1..=12 {
        closes.push(100.0 - 2.0 * k as f64);
    }
    series(symbol, &closes, &[1000.0; 32])
}

pub fn scan_feed() -> FixtureFeed {
    FixtureFeed::new()
        .with_candles("DOGE-USD", crash_series("DOGE-USD"))
        .with_candles("AAPL", calm_series("AAPL"))
        .with_candles("MSFT", dip_series("MSFT"))
}
