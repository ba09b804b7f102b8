//! Opportunity scoring.
//!
//! A score is the sum of independently capped contributions:
//!
//! | factor                     | trigger                         | points                      |
//! |----------------------------|---------------------------------|-----------------------------|
//! | long-window decline        | change <= -decline_threshold    | |change| * weight, capped   |
//! | reversal                   | short > 0 while long < 0        | short * weight, capped      |
//! | oversold RSI               | RSI < 30 (< 25 extra)           | fixed bonus                 |
//! | volume surge               | ratio > threshold               | (ratio - 1) * weight, capped|
//! | short momentum             | short > 0                       | short * weight, capped      |
//! | near lower Bollinger band  | close within band proximity     | fixed bonus                 |
//!
//! The total is clamped to [0, max_score]. Category never enters the score.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::domain::candle::Candle;
use crate::domain::category::{classify, Category};
use crate::domain::error::PapertrailError;
use crate::domain::indicator::IndicatorSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Watch,
    Hold,
    InsufficientData,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Recommendation::StrongBuy => "STRONG_BUY",
            Recommendation::Buy => "BUY",
            Recommendation::Watch => "WATCH",
            Recommendation::Hold => "HOLD",
            Recommendation::InsufficientData => "INSUFFICIENT_DATA",
        };
        f.write_str(label)
    }
}

/// Tunable weights, caps and thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub short_window: usize,
    pub long_window: usize,
    pub volume_window: usize,

    pub decline_threshold_pct: f64,
    pub decline_weight: f64,
    pub decline_cap: f64,

    pub reversal_weight: f64,
    pub reversal_cap: f64,

    pub rsi_oversold: f64,
    pub rsi_deep_oversold: f64,
    pub rsi_oversold_bonus: f64,
    pub rsi_deep_oversold_bonus: f64,

    pub volume_surge_ratio: f64,
    pub volume_weight: f64,
    pub volume_cap: f64,

    pub momentum_weight: f64,
    pub momentum_cap: f64,

    pub band_proximity_pct: f64,
    pub band_bonus: f64,

    pub strong_buy_threshold: f64,
    pub buy_threshold: f64,
    pub watch_threshold: f64,
    pub max_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            short_window: 1,
            long_window: 7,
            volume_window: 20,
            decline_threshold_pct: 10.0,
            decline_weight: 1.0,
            decline_cap: 40.0,
            reversal_weight: 5.0,
            reversal_cap: 15.0,
            rsi_oversold: 30.0,
            rsi_deep_oversold: 25.0,
            rsi_oversold_bonus: 15.0,
            rsi_deep_oversold_bonus: 10.0,
            volume_surge_ratio: 1.5,
            volume_weight: 10.0,
            volume_cap: 15.0,
            momentum_weight: 2.0,
            momentum_cap: 5.0,
            band_proximity_pct: 2.0,
            band_bonus: 5.0,
            strong_buy_threshold: 70.0,
            buy_threshold: 50.0,
            watch_threshold: 30.0,
            max_score: 100.0,
        }
    }
}

impl ScoringConfig {
    pub fn recommendation_for(&self, score: f64) -> Recommendation {
        if score >= self.strong_buy_threshold {
            Recommendation::StrongBuy
        } else if score >= self.buy_threshold {
            Recommendation::Buy
        } else if score >= self.watch_threshold {
            Recommendation::Watch
        } else {
            Recommendation::Hold
        }
    }

    /// Candles needed before a symbol can be scored at all.
    pub fn min_candles(&self) -> usize {
        self.long_window.max(self.short_window) + 1
    }
}

/// Price-change and volume heuristics derived from a candle series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketMetrics {
    pub short_change_pct: f64,
    pub long_change_pct: f64,
    pub volume_ratio: f64,
}

/// Derive short/long % change and the volume ratio (latest volume over the
/// mean of up to `volume_window` preceding candles).
///
/// Fails with `InsufficientData` when there are fewer than
/// `long_window + 1` candles or when volume is zero.
pub fn market_metrics(
    symbol: &str,
    candles: &[Candle],
    config: &ScoringConfig,
) -> Result<MarketMetrics, PapertrailError> {
    let need = config.min_candles();
    let insufficient = || PapertrailError::InsufficientData {
        symbol: symbol.to_string(),
        have: candles.len(),
        need,
    };
    if candles.len() < need || config.short_window == 0 || config.long_window == 0 {
        return Err(insufficient());
    }

    let n = candles.len();
    let last = &candles[n - 1];
    let short_change_pct = last
        .pct_change_from(&candles[n - 1 - config.short_window])
        .ok_or_else(insufficient)?;
    let long_change_pct = last
        .pct_change_from(&candles[n - 1 - config.long_window])
        .ok_or_else(insufficient)?;

    let trailing_start = (n - 1).saturating_sub(config.volume_window.max(1));
    let trailing = &candles[trailing_start..n - 1];
    let trailing_avg = trailing.iter().map(|c| c.volume).sum::<f64>() / trailing.len() as f64;
    if last.volume <= 0.0 || trailing_avg <= 0.0 {
        return Err(insufficient());
    }

    Ok(MarketMetrics {
        short_change_pct,
        long_change_pct,
        volume_ratio: last.volume / trailing_avg,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpportunitySignal {
    pub symbol: String,
    pub category: Category,
    pub score: f64,
    pub recommendation: Recommendation,
    pub contributing_factors: Vec<String>,
    pub computed_at: DateTime<Utc>,
    pub short_change_pct: Option<f64>,
    pub long_change_pct: Option<f64>,
    pub volume_ratio: Option<f64>,
}

impl OpportunitySignal {
    pub fn insufficient_data(symbol: &str, reason: &str, computed_at: DateTime<Utc>) -> Self {
        OpportunitySignal {
            symbol: symbol.to_string(),
            category: classify(symbol),
            score: 0.0,
            recommendation: Recommendation::InsufficientData,
            contributing_factors: vec![reason.to_string()],
            computed_at,
            short_change_pct: None,
            long_change_pct: None,
            volume_ratio: None,
        }
    }

    /// Magnitude of the long-window decline, 0 when the symbol did not fall.
    pub fn decline_magnitude(&self) -> f64 {
        self.long_change_pct.map(|c| (-c).max(0.0)).unwrap_or(0.0)
    }

    pub fn is_scored(&self) -> bool {
        self.recommendation != Recommendation::InsufficientData
    }
}

fn capped(value: f64, cap: f64) -> f64 {
    value.max(0.0).min(cap)
}

/// Score one symbol from its snapshot and metrics.
pub fn score_symbol(
    symbol: &str,
    snapshot: &IndicatorSnapshot,
    metrics: &MarketMetrics,
    config: &ScoringConfig,
    computed_at: DateTime<Utc>,
) -> OpportunitySignal {
    let mut score = 0.0;
    let mut factors = Vec::new();
    let short = metrics.short_change_pct;
    let long = metrics.long_change_pct;

    if long <= -config.decline_threshold_pct {
        let pts = capped(-long * config.decline_weight, config.decline_cap);
        score += pts;
        factors.push(format!("long-window decline {long:.1}% (+{pts:.1})"));
    }

    if short > 0.0 && long < 0.0 {
        let pts = capped(short * config.reversal_weight, config.reversal_cap);
        score += pts;
        factors.push(format!(
            "reversal: short-window {short:+.1}% against long-window {long:.1}% (+{pts:.1})"
        ));
    }

    if let Some(rsi) = snapshot.rsi {
        if rsi < config.rsi_oversold {
            let mut pts = config.rsi_oversold_bonus;
            if rsi < config.rsi_deep_oversold {
                pts += config.rsi_deep_oversold_bonus;
            }
            score += pts;
            factors.push(format!("oversold RSI {rsi:.1} (+{pts:.1})"));
        }
    }

    if metrics.volume_ratio > config.volume_surge_ratio {
        let ratio = metrics.volume_ratio;
        let pts = capped((ratio - 1.0) * config.volume_weight, config.volume_cap);
        score += pts;
        factors.push(format!("volume surge {ratio:.2}x average (+{pts:.1})"));
    }

    if short > 0.0 {
        let pts = capped(short * config.momentum_weight, config.momentum_cap);
        score += pts;
        factors.push(format!("short-window momentum {short:+.1}% (+{pts:.1})"));
    }

    if let (Some(close), Some(lower)) = (snapshot.last_close, snapshot.bollinger_lower) {
        if lower > 0.0 && (close - lower) / lower * 100.0 <= config.band_proximity_pct {
            let pts = config.band_bonus;
            score += pts;
            factors.push(format!(
                "price {close:.2} near lower Bollinger band {lower:.2} (+{pts:.1})"
            ));
        }
    }

    let score = score.clamp(0.0, config.max_score);
    OpportunitySignal {
        symbol: symbol.to_string(),
        category: classify(symbol),
        score,
        recommendation: config.recommendation_for(score),
        contributing_factors: factors,
        computed_at,
        short_change_pct: Some(short),
        long_change_pct: Some(long),
        volume_ratio: Some(metrics.volume_ratio),
    }
}

/// Keep only the latest signal per symbol. Later entries win ties on
/// `computed_at`.
pub fn dedup_latest(signals: Vec<OpportunitySignal>) -> Vec<OpportunitySignal> {
    let mut slot: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<OpportunitySignal> = Vec::with_capacity(signals.len());

    for signal in signals {
        match slot.get(&signal.symbol) {
            Some(&idx) => {
                if signal.computed_at >= kept[idx].computed_at {
                    kept[idx] = signal;
                }
            }
            None => {
                slot.insert(signal.symbol.clone(), kept.len());
                kept.push(signal);
            }
        }
    }

    kept
}

/// Ranking order: scored before unscored, score descending, larger decline
/// first, then symbol ascending.
pub fn compare_signals(a: &OpportunitySignal, b: &OpportunitySignal) -> Ordering {
    b.is_scored()
        .cmp(&a.is_scored())
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| b.decline_magnitude().total_cmp(&a.decline_magnitude()))
        .then_with(|| a.symbol.cmp(&b.symbol))
}

/// Deduplicate, filter and rank a batch of signals.
///
/// Signals below `min_score` are dropped; unscored signals survive only when
/// `min_score <= 0`. `category` filters on the static classification.
pub fn rank_signals(
    signals: Vec<OpportunitySignal>,
    min_score: f64,
    category: Option<Category>,
) -> Vec<OpportunitySignal> {
    let mut ranked: Vec<OpportunitySignal> = dedup_latest(signals)
        .into_iter()
        .filter(|s| s.score >= min_score)
        .filter(|s| category.is_none_or(|c| s.category == c))
        .collect();
    ranked.sort_by(compare_signals);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn snapshot_with_rsi(rsi: Option<f64>) -> IndicatorSnapshot {
        IndicatorSnapshot {
            symbol: "X".into(),
            rsi,
            ..Default::default()
        }
    }

    fn metrics(short: f64, long: f64, volume_ratio: f64) -> MarketMetrics {
        MarketMetrics {
            short_change_pct: short,
            long_change_pct: long,
            volume_ratio,
        }
    }

    fn signal(symbol: &str, score: f64, long: f64) -> OpportunitySignal {
        let config = ScoringConfig::default();
        OpportunitySignal {
            symbol: symbol.into(),
            category: classify(symbol),
            score,
            recommendation: config.recommendation_for(score),
            contributing_factors: vec![],
            computed_at: now(),
            short_change_pct: Some(0.0),
            long_change_pct: Some(long),
            volume_ratio: Some(1.0),
        }
    }

    fn candles(closes: &[f64], volumes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&close, &volume))| Candle {
                symbol: "X".into(),
                timestamp: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume,
            })
            .collect()
    }

    #[test]
    fn crash_with_oversold_rsi_and_volume_is_strong_buy() {
        let config = ScoringConfig::default();
        let s = score_symbol(
            "DOGE-USD",
            &snapshot_with_rsi(Some(22.0)),
            &metrics(0.0, -45.0, 2.1),
            &config,
            now(),
        );
        assert!(s.score >= config.strong_buy_threshold, "score {}", s.score);
        assert_eq!(s.recommendation, Recommendation::StrongBuy);
        // decline 40 (capped) + RSI 25 + volume 11
        assert_relative_eq!(s.score, 76.0, epsilon = 1e-9);
        assert_eq!(s.contributing_factors.len(), 3);
        assert!(s.contributing_factors[0].starts_with("long-window decline"));
    }

    #[test]
    fn each_factor_is_capped() {
        let config = ScoringConfig::default();
        let s = score_symbol(
            "X",
            &IndicatorSnapshot {
                rsi: Some(5.0),
                last_close: Some(10.0),
                bollinger_lower: Some(10.0),
                ..Default::default()
            },
            &metrics(50.0, -95.0, 40.0),
            &config,
            now(),
        );
        // 40 + 15 + 25 + 15 + 5 + 5 = 105, clamped to 100
        assert_relative_eq!(s.score, config.max_score);
        assert_eq!(s.contributing_factors.len(), 6);
    }

    #[test]
    fn quiet_market_holds() {
        let config = ScoringConfig::default();
        let s = score_symbol(
            "AAPL",
            &snapshot_with_rsi(Some(55.0)),
            &metrics(-0.5, 2.0, 1.0),
            &config,
            now(),
        );
        assert_eq!(s.score, 0.0);
        assert_eq!(s.recommendation, Recommendation::Hold);
        assert!(s.contributing_factors.is_empty());
    }

    #[test]
    fn reversal_and_momentum() {
        let config = ScoringConfig::default();
        let s = score_symbol(
            "X",
            &snapshot_with_rsi(None),
            &metrics(2.0, -5.0, 1.0),
            &config,
            now(),
        );
        // decline below threshold: 0; reversal 10; momentum 4
        assert_relative_eq!(s.score, 14.0, epsilon = 1e-9);
        assert_eq!(s.recommendation, Recommendation::Hold);
    }

    #[test]
    fn thresholds_map_to_recommendations() {
        let config = ScoringConfig::default();
        assert_eq!(config.recommendation_for(70.0), Recommendation::StrongBuy);
        assert_eq!(config.recommendation_for(69.9), Recommendation::Buy);
        assert_eq!(config.recommendation_for(50.0), Recommendation::Buy);
        assert_eq!(config.recommendation_for(30.0), Recommendation::Watch);
        assert_eq!(config.recommendation_for(29.9), Recommendation::Hold);
    }

    #[test]
    fn metrics_from_candles() {
        let config = ScoringConfig {
            volume_window: 3,
            ..ScoringConfig::default()
        };
        let closes = [100.0, 90.0, 80.0, 70.0, 60.0, 55.0, 50.0, 55.0];
        let volumes = [1.0, 1.0, 1.0, 1.0, 1.0, 100.0, 100.0, 400.0];
        let m = market_metrics("X", &candles(&closes, &volumes), &config).unwrap();
        assert_relative_eq!(m.short_change_pct, 10.0, epsilon = 1e-9);
        assert_relative_eq!(m.long_change_pct, -45.0, epsilon = 1e-9);
        // 400 / mean(1, 100, 100)
        assert_relative_eq!(m.volume_ratio, 400.0 / 67.0, epsilon = 1e-9);
    }

    #[test]
    fn metrics_need_long_window_history() {
        let config = ScoringConfig::default();
        let c = candles(&[1.0; 7], &[1.0; 7]);
        assert!(matches!(
            market_metrics("X", &c, &config),
            Err(PapertrailError::InsufficientData { have: 7, need: 8, .. })
        ));
    }

    #[test]
    fn metrics_reject_zero_volume() {
        let config = ScoringConfig::default();
        let c = candles(&[10.0; 10], &[0.0; 10]);
        assert!(matches!(
            market_metrics("X", &c, &config),
            Err(PapertrailError::InsufficientData { .. })
        ));
    }

    #[test]
    fn ranking_breaks_ties_by_decline_then_symbol() {
        let ranked = rank_signals(
            vec![
                signal("CCC", 50.0, -20.0),
                signal("BBB", 50.0, -30.0),
                signal("AAA", 50.0, -20.0),
                signal("ZZZ", 80.0, -10.0),
            ],
            0.0,
            None,
        );
        let order: Vec<&str> = ranked.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(order, vec!["ZZZ", "BBB", "AAA", "CCC"]);
    }

    #[test]
    fn insufficient_data_sorts_last() {
        let ranked = rank_signals(
            vec![
                OpportunitySignal::insufficient_data("NEW", "no candle history", now()),
                signal("OLD", 0.0, 5.0),
            ],
            0.0,
            None,
        );
        assert_eq!(ranked[0].symbol, "OLD");
        assert_eq!(ranked[1].symbol, "NEW");
        assert_eq!(ranked[1].score, 0.0);
        assert_eq!(ranked[1].recommendation, Recommendation::InsufficientData);
    }

    #[test]
    fn min_score_filters_unscored_when_positive() {
        let ranked = rank_signals(
            vec![
                OpportunitySignal::insufficient_data("NEW", "no candle history", now()),
                signal("A", 35.0, -10.0),
                signal("B", 10.0, -10.0),
            ],
            30.0,
            None,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].symbol, "A");
    }

    #[test]
    fn dedup_keeps_latest() {
        let mut early = signal("A", 90.0, -40.0);
        early.computed_at = now() - Duration::minutes(5);
        let late = signal("A", 10.0, -1.0);
        let ranked = rank_signals(vec![late.clone(), early, signal("B", 20.0, 0.0)], 0.0, None);
        assert_eq!(ranked.len(), 2);
        let a = ranked.iter().find(|s| s.symbol == "A").unwrap();
        assert_eq!(a.score, 10.0);
        assert_eq!(a.computed_at, late.computed_at);
    }

    #[test]
    fn category_filters_without_touching_score() {
        let ranked = rank_signals(
            vec![signal("BTC-USD", 60.0, -20.0), signal("AAPL", 90.0, -20.0)],
            0.0,
            Some(Category::Crypto),
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].symbol, "BTC-USD");
        assert_eq!(ranked[0].score, 60.0);
    }
}
