//! Typed configuration loading.
//!
//! Every value read from the INI file is validated here before it reaches
//! the ledger or the scanner. Missing keys fall back to defaults; present
//! but invalid or unparseable keys are `ConfigInvalid`.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::Duration;
use rust_decimal::Decimal;

use crate::domain::error::PapertrailError;
use crate::domain::indicator::IndicatorParams;
use crate::domain::ledger::{LedgerConfig, DEFAULT_TRACKING_WINDOW_DAYS};
use crate::domain::scanner::{RetryPolicy, ScanConfig};
use crate::domain::scoring::ScoringConfig;
use crate::ports::config_port::ConfigPort;

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> PapertrailError {
    PapertrailError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

pub fn positive_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, PapertrailError> {
    let value = config.get_int(section, key, default as i64)?;
    if value < 1 {
        return Err(invalid(section, key, format!("{key} must be at least 1")));
    }
    Ok(value as usize)
}

fn non_negative_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: u64,
) -> Result<u64, PapertrailError> {
    let value = config.get_int(section, key, default as i64)?;
    if value < 0 {
        return Err(invalid(section, key, format!("{key} must be non-negative")));
    }
    Ok(value as u64)
}

fn non_negative(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, PapertrailError> {
    let value = config.get_double(section, key, default)?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(section, key, format!("{key} must be non-negative")));
    }
    Ok(value)
}

pub fn load_ledger_config(config: &dyn ConfigPort) -> Result<LedgerConfig, PapertrailError> {
    let defaults = LedgerConfig::default();

    let days = config.get_int("ledger", "tracking_window_days", DEFAULT_TRACKING_WINDOW_DAYS)?;
    if days < 1 {
        return Err(invalid(
            "ledger",
            "tracking_window_days",
            "tracking_window_days must be at least 1",
        ));
    }

    let default_initial_balance = match config.get_string("ledger", "initial_balance") {
        None => defaults.default_initial_balance,
        Some(raw) => {
            let value = Decimal::from_str(raw.trim())
                .map_err(|e| invalid("ledger", "initial_balance", e.to_string()))?;
            if value < Decimal::ZERO {
                return Err(invalid(
                    "ledger",
                    "initial_balance",
                    "initial_balance must be non-negative",
                ));
            }
            value
        }
    };

    Ok(LedgerConfig {
        tracking_window: Duration::days(days),
        default_initial_balance,
    })
}

pub fn load_indicator_params(config: &dyn ConfigPort) -> Result<IndicatorParams, PapertrailError> {
    let d = IndicatorParams::default();
    let params = IndicatorParams {
        rsi_period: positive_int(config, "scoring", "rsi_period", d.rsi_period)?,
        macd_fast: positive_int(config, "scoring", "macd_fast", d.macd_fast)?,
        macd_slow: positive_int(config, "scoring", "macd_slow", d.macd_slow)?,
        macd_signal: positive_int(config, "scoring", "macd_signal", d.macd_signal)?,
        bollinger_period: positive_int(config, "scoring", "bollinger_period", d.bollinger_period)?,
        bollinger_k: non_negative(config, "scoring", "bollinger_k", d.bollinger_k)?,
        stoch_rsi_period: positive_int(config, "scoring", "stoch_rsi_period", d.stoch_rsi_period)?,
    };
    if params.macd_fast >= params.macd_slow {
        return Err(invalid(
            "scoring",
            "macd_fast",
            "macd_fast must be less than macd_slow",
        ));
    }
    Ok(params)
}

pub fn load_scoring_config(config: &dyn ConfigPort) -> Result<ScoringConfig, PapertrailError> {
    let d = ScoringConfig::default();
    let s = "scoring";
    let scoring = ScoringConfig {
        short_window: positive_int(config, s, "short_window", d.short_window)?,
        long_window: positive_int(config, s, "long_window", d.long_window)?,
        volume_window: positive_int(config, s, "volume_window", d.volume_window)?,
        decline_threshold_pct: non_negative(config, s, "decline_threshold_pct", d.decline_threshold_pct)?,
        decline_weight: non_negative(config, s, "decline_weight", d.decline_weight)?,
        decline_cap: non_negative(config, s, "decline_cap", d.decline_cap)?,
        reversal_weight: non_negative(config, s, "reversal_weight", d.reversal_weight)?,
        reversal_cap: non_negative(config, s, "reversal_cap", d.reversal_cap)?,
        rsi_oversold: non_negative(config, s, "rsi_oversold", d.rsi_oversold)?,
        rsi_deep_oversold: non_negative(config, s, "rsi_deep_oversold", d.rsi_deep_oversold)?,
        rsi_oversold_bonus: non_negative(config, s, "rsi_oversold_bonus", d.rsi_oversold_bonus)?,
        rsi_deep_oversold_bonus: non_negative(
            config,
            s,
            "rsi_deep_oversold_bonus",
            d.rsi_deep_oversold_bonus,
        )?,
        volume_surge_ratio: non_negative(config, s, "volume_surge_ratio", d.volume_surge_ratio)?,
        volume_weight: non_negative(config, s, "volume_weight", d.volume_weight)?,
        volume_cap: non_negative(config, s, "volume_cap", d.volume_cap)?,
        momentum_weight: non_negative(config, s, "momentum_weight", d.momentum_weight)?,
        momentum_cap: non_negative(config, s, "momentum_cap", d.momentum_cap)?,
        band_proximity_pct: non_negative(config, s, "band_proximity_pct", d.band_proximity_pct)?,
        band_bonus: non_negative(config, s, "band_bonus", d.band_bonus)?,
        strong_buy_threshold: non_negative(config, s, "strong_buy_threshold", d.strong_buy_threshold)?,
        buy_threshold: non_negative(config, s, "buy_threshold", d.buy_threshold)?,
        watch_threshold: non_negative(config, s, "watch_threshold", d.watch_threshold)?,
        max_score: d.max_score,
    };

    if scoring.rsi_oversold > 100.0 || scoring.rsi_deep_oversold > scoring.rsi_oversold {
        return Err(invalid(
            s,
            "rsi_deep_oversold",
            "expected 0 <= rsi_deep_oversold <= rsi_oversold <= 100",
        ));
    }
    if !(scoring.watch_threshold <= scoring.buy_threshold
        && scoring.buy_threshold <= scoring.strong_buy_threshold
        && scoring.strong_buy_threshold <= scoring.max_score)
    {
        return Err(invalid(
            s,
            "strong_buy_threshold",
            "expected watch_threshold <= buy_threshold <= strong_buy_threshold <= 100",
        ));
    }
    if scoring.short_window > scoring.long_window {
        return Err(invalid(
            s,
            "short_window",
            "short_window must not exceed long_window",
        ));
    }
    Ok(scoring)
}

pub fn load_scan_config(config: &dyn ConfigPort) -> Result<ScanConfig, PapertrailError> {
    let d = ScanConfig::default();
    let interval = config
        .get_string("scan", "interval")
        .map(|s| s.trim().to_string())
        .unwrap_or(d.interval);
    if interval.is_empty() {
        return Err(invalid("scan", "interval", "interval must not be empty"));
    }

    let retry = RetryPolicy {
        max_attempts: positive_int(config, "scan", "max_attempts", d.retry.max_attempts as usize)?
            as u32,
        base_delay_ms: non_negative_int(config, "scan", "base_delay_ms", d.retry.base_delay_ms)?,
        max_delay_ms: non_negative_int(config, "scan", "max_delay_ms", d.retry.max_delay_ms)?,
        call_timeout_ms: non_negative_int(config, "scan", "call_timeout_ms", d.retry.call_timeout_ms)?,
    };
    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(invalid(
            "scan",
            "max_delay_ms",
            "max_delay_ms must be at least base_delay_ms",
        ));
    }

    Ok(ScanConfig {
        workers: positive_int(config, "scan", "workers", d.workers)?,
        interval,
        lookback: positive_int(config, "scan", "lookback", d.lookback)?,
        retry,
    })
}

/// The scan lookback must cover the scoring window.
pub fn check_scan_covers_scoring(
    scan: &ScanConfig,
    scoring: &ScoringConfig,
) -> Result<(), PapertrailError> {
    if scan.lookback < scoring.min_candles() {
        return Err(invalid(
            "scan",
            "lookback",
            format!(
                "lookback {} is shorter than the {} candles scoring needs",
                scan.lookback,
                scoring.min_candles()
            ),
        ));
    }
    Ok(())
}

/// Parse a comma-separated symbol list: trimmed, upper-cased, no blanks or
/// duplicates.
pub fn parse_symbols(input: &str) -> Result<Vec<String>, PapertrailError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(PapertrailError::invalid_input("empty token in symbol list"));
        }
        let symbol = trimmed.to_uppercase();
        if !seen.insert(symbol.clone()) {
            return Err(PapertrailError::invalid_input(format!(
                "duplicate symbol: {symbol}"
            )));
        }
        symbols.push(symbol);
    }

    Ok(symbols)
}

/// Default scan universe from `[scan] symbols`, empty when unset.
pub fn configured_symbols(config: &dyn ConfigPort) -> Result<Vec<String>, PapertrailError> {
    match config.get_string("scan", "symbols") {
        Some(list) if !list.trim().is_empty() => {
            parse_symbols(&list).map_err(|e| invalid("scan", "symbols", e.to_string()))
        }
        _ => Ok(Vec::new()),
    }
}
