//! Stochastic RSI.
//!
//! StochRSI = (RSI - min(RSI, n)) / (max(RSI, n) - min(RSI, n)), in [0, 1].
//! When the window's max equals its min the range is degenerate and the
//! value is 0.5.
//!
//! Warmup: the RSI needs n+1 candles, then n RSI values fill the window,
//! so the first valid point is at index 2n-1.

use crate::domain::candle::Candle;
use crate::domain::indicator::{
    calculate_rsi, IndicatorError, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
};

fn normalize(window: &[f64]) -> f64 {
    let current = window[window.len() - 1];
    let min = window.iter().copied().fold(f64::INFINITY, f64::min);
    let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == min {
        0.5
    } else {
        (current - min) / (max - min)
    }
}

pub fn calculate_stoch_rsi(candles: &[Candle], period: usize) -> IndicatorSeries {
    let rsi_series = calculate_rsi(candles, period);
    let mut window: Vec<f64> = Vec::with_capacity(period);

    let values = rsi_series
        .values
        .iter()
        .map(|point| {
            if point.valid {
                if let IndicatorValue::Simple(v) = point.value {
                    if window.len() == period {
                        window.remove(0);
                    }
                    window.push(v);
                }
            }
            let valid = point.valid && period > 0 && window.len() == period;
            IndicatorPoint {
                timestamp: point.timestamp,
                valid,
                value: IndicatorValue::Simple(if valid { normalize(&window) } else { 0.0 }),
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::StochRsi(period),
        values,
    }
}

/// Latest stochastic RSI in [0, 1]; requires at least `2 * period` candles.
pub fn stochastic_rsi(candles: &[Candle], period: usize) -> Result<f64, IndicatorError> {
    let indicator = IndicatorType::StochRsi(period);
    if period == 0 {
        return Err(IndicatorError::InvalidParameters {
            indicator,
            reason: "period must be positive".into(),
        });
    }
    IndicatorError::check_history(indicator.clone(), candles.len())?;

    let series = calculate_stoch_rsi(candles, period);
    match series.latest_valid().map(|p| &p.value) {
        Some(IndicatorValue::Simple(v)) => Ok(*v),
        _ => Err(IndicatorError::InsufficientData {
            need: indicator.min_candles(),
            indicator,
            have: candles.len(),
        }),
    }
}
