//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: slow - 1 + signal - 1 candles (the MACD line exists once the
//! slow EMA does; the signal EMA then needs `signal` MACD values).

use crate::domain::candle::Candle;
use crate::domain::indicator::{
    ema_values, IndicatorError, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

pub fn calculate_macd(
    candles: &[Candle],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    if candles.is_empty() || fast == 0 || slow == 0 || signal_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let ema_fast = ema_values(&closes, fast);
    let ema_slow = ema_values(&closes, slow);

    let macd_line: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    // Signal EMA runs over the defined part of the MACD line only.
    let first_defined = macd_line.iter().position(Option::is_some);
    let mut signal_line: Vec<Option<f64>> = vec![None; candles.len()];
    if let Some(start) = first_defined {
        let defined: Vec<f64> = macd_line[start..].iter().flatten().copied().collect();
        for (offset, value) in ema_values(&defined, signal_period).into_iter().enumerate() {
            signal_line[start + offset] = value;
        }
    }

    let values = candles
        .iter()
        .enumerate()
        .map(|(i, candle)| match (macd_line[i], signal_line[i]) {
            (Some(line), Some(signal)) => IndicatorPoint {
                timestamp: candle.timestamp,
                valid: true,
                value: IndicatorValue::Macd {
                    line,
                    signal,
                    histogram: line - signal,
                },
            },
            (line, _) => IndicatorPoint {
                timestamp: candle.timestamp,
                valid: false,
                value: IndicatorValue::Macd {
                    line: line.unwrap_or(0.0),
                    signal: 0.0,
                    histogram: 0.0,
                },
            },
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

/// Latest MACD line, signal and histogram.
pub fn macd(
    candles: &[Candle],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Result<MacdValue, IndicatorError> {
    let indicator = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return Err(IndicatorError::InvalidParameters {
            indicator,
            reason: "periods must be positive with fast < slow".into(),
        });
    }
    IndicatorError::check_history(indicator.clone(), candles.len())?;

    let series = calculate_macd(candles, fast, slow, signal_period);
    match series.latest_valid().map(|p| &p.value) {
        Some(IndicatorValue::Macd {
            line,
            signal,
            histogram,
        }) => Ok(MacdValue {
            line: *line,
            signal: *signal,
            histogram: *histogram,
        }),
        _ => Err(IndicatorError::InsufficientData {
            need: indicator.min_candles(),
            indicator,
            have: candles.len(),
        }),
    }
}
