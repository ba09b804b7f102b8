//! Technical indicator implementations.
//!
//! Every indicator comes in two shapes:
//! - a `calculate_*` function producing an `IndicatorSeries` aligned with the
//!   input candles, where warm-up points carry `valid: false`;
//! - a latest-value function (`rsi`, `macd`, `bollinger`, `stochastic_rsi`)
//!   that fails with `IndicatorError::InsufficientData` when the history is
//!   too short for even one valid point.
//!
//! All functions are pure and stateless.

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod snapshot;
pub mod stoch_rsi;

pub use bollinger::{bollinger, calculate_bollinger, BollingerBands};
pub use ema::{calculate_ema, calculate_sma, ema_values};
pub use macd::{calculate_macd, macd, MacdValue};
pub use rsi::{calculate_rsi, rsi};
pub use snapshot::{compute_snapshot, IndicatorParams, IndicatorSnapshot};
pub use stoch_rsi::{calculate_stoch_rsi, stochastic_rsi};

use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone)]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    StochRsi(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
}

impl IndicatorType {
    /// Minimum number of candles needed for the first valid point.
    pub fn min_candles(&self) -> usize {
        match *self {
            IndicatorType::Sma(p) | IndicatorType::Ema(p) => p.max(1),
            IndicatorType::Rsi(p) => p.max(1) + 1,
            IndicatorType::StochRsi(p) => 2 * p.max(1),
            IndicatorType::Macd { slow, signal, .. } => slow.max(1) + signal.max(1) - 1,
            IndicatorType::Bollinger { period, .. } => period.max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    /// Most recent point flagged valid, if any.
    pub fn latest_valid(&self) -> Option<&IndicatorPoint> {
        self.values.iter().rev().find(|p| p.valid)
    }

    /// Simple values of all valid points, oldest first.
    pub fn valid_simple_values(&self) -> Vec<f64> {
        self.values
            .iter()
            .filter(|p| p.valid)
            .filter_map(|p| match p.value {
                IndicatorValue::Simple(v) => Some(v),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndicatorError {
    #[error("{indicator} needs {need} candles, have {have}")]
    InsufficientData {
        indicator: IndicatorType,
        have: usize,
        need: usize,
    },

    #[error("invalid {indicator} parameters: {reason}")]
    InvalidParameters {
        indicator: IndicatorType,
        reason: String,
    },
}

impl IndicatorError {
    pub(crate) fn check_history(
        indicator: IndicatorType,
        have: usize,
    ) -> Result<(), IndicatorError> {
        let need = indicator.min_candles();
        if have < need {
            return Err(IndicatorError::InsufficientData {
                indicator,
                have,
                need,
            });
        }
        Ok(())
    }

    /// Attach the symbol the indicator was computed for.
    pub fn for_symbol(self, symbol: &str) -> crate::domain::error::PapertrailError {
        use crate::domain::error::PapertrailError;
        match self {
            IndicatorError::InsufficientData { have, need, .. } => {
                PapertrailError::InsufficientData {
                    symbol: symbol.to_string(),
                    have,
                    need,
                }
            }
            IndicatorError::InvalidParameters { indicator, reason } => {
                PapertrailError::invalid_input(format!("{indicator}: {reason}"))
            }
        }
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::StochRsi(period) => write!(f, "STOCHRSI({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
        }
    }
}
