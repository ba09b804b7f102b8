//! Bollinger Bands indicator.
//!
//! Bollinger Bands consist of:
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! Where StdDev is population standard deviation (divides by N, not N-1).
//!
//! Default parameters: period=20, multiplier=2.0
//! Warmup: first (period-1) candles are invalid.

use crate::domain::candle::Candle;
use crate::domain::indicator::{
    calculate_sma, IndicatorError, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
};

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

fn multiplier_label(k: f64) -> u32 {
    (k * 100.0).round().max(0.0) as u32
}

/// Bands over every candle. `k` is used as given; the series type only
/// carries it rounded to hundredths as a label.
pub fn calculate_bollinger(candles: &[Candle], period: usize, k: f64) -> IndicatorSeries {
    let sma = calculate_sma(candles, period);

    let values = sma
        .values
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let (upper, middle, lower) = match point.value {
                IndicatorValue::Simple(middle) if point.valid => {
                    let window = &candles[i + 1 - period..=i];
                    let variance: f64 = window
                        .iter()
                        .map(|c| {
                            let diff = c.close - middle;
                            diff * diff
                        })
                        .sum::<f64>()
                        / period as f64;
                    let stddev = variance.sqrt();
                    (middle + k * stddev, middle, middle - k * stddev)
                }
                _ => (0.0, 0.0, 0.0),
            };
            IndicatorPoint {
                timestamp: point.timestamp,
                valid: point.valid,
                value: IndicatorValue::Bollinger {
                    upper,
                    middle,
                    lower,
                },
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Bollinger {
            period,
            stddev_mult_x100: multiplier_label(k),
        },
        values,
    }
}

/// Latest bands for a `k` standard deviation envelope.
pub fn bollinger(
    candles: &[Candle],
    period: usize,
    k: f64,
) -> Result<BollingerBands, IndicatorError> {
    let indicator = IndicatorType::Bollinger {
        period,
        stddev_mult_x100: multiplier_label(k),
    };
    if period == 0 || !k.is_finite() || k < 0.0 {
        return Err(IndicatorError::InvalidParameters {
            indicator,
            reason: "period must be positive and k non-negative".into(),
        });
    }
    IndicatorError::check_history(indicator, candles.len())?;

    let series = calculate_bollinger(candles, period, k);
    match series.latest_valid().map(|p| &p.value) {
        Some(IndicatorValue::Bollinger {
            upper,
            middle,
            lower,
        }) => Ok(BollingerBands {
            upper: *upper,
            middle: *middle,
            lower: *lower,
        }),
        _ => Err(IndicatorError::InsufficientData {
            indicator: series.indicator_type,
            have: candles.len(),
            need: period,
        }),
    }
}
