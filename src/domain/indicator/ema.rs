//! Simple and exponential moving averages.
//!
//! EMA: k = 2/(n+1), seeded with the SMA of the first n values, then
//! EMA[i] = V[i]*k + EMA[i-1]*(1-k).
//! Warmup: first (n-1) points are invalid for both SMA and EMA.

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

/// EMA over an arbitrary value sequence; `None` during warmup.
pub fn ema_values(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = 0.0;
    let mut sum = 0.0;

    for (i, &v) in values.iter().enumerate() {
        if i < period - 1 {
            sum += v;
            out.push(None);
        } else if i == period - 1 {
            sum += v;
            ema = sum / period as f64;
            out.push(Some(ema));
        } else {
            ema = v * k + ema * (1.0 - k);
            out.push(Some(ema));
        }
    }

    out
}

pub fn calculate_ema(candles: &[Candle], period: usize) -> IndicatorSeries {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let values = ema_values(&closes, period)
        .into_iter()
        .zip(candles)
        .map(|(ema, candle)| IndicatorPoint {
            timestamp: candle.timestamp,
            valid: ema.is_some(),
            value: IndicatorValue::Simple(ema.unwrap_or(0.0)),
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Ema(period),
        values,
    }
}

pub fn calculate_sma(candles: &[Candle], period: usize) -> IndicatorSeries {
    let mut values = Vec::with_capacity(candles.len());
    let mut window_sum = 0.0;

    for (i, candle) in candles.iter().enumerate() {
        window_sum += candle.close;
        if period > 0 && i >= period {
            window_sum -= candles[i - period].close;
        }
        let valid = period > 0 && i + 1 >= period;
        values.push(IndicatorPoint {
            timestamp: candle.timestamp,
            valid,
            value: IndicatorValue::Simple(if valid {
                window_sum / period as f64
            } else {
                0.0
            }),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Sma(period),
        values,
    }
}
