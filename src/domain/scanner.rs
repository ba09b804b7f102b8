//! Batch opportunity scan.
//!
//! Symbols are scored on a bounded rayon pool. Feed calls are retried with
//! exponential backoff; a symbol whose feed keeps failing is reported in the
//! skipped list and never aborts the batch. Cancelling discards everything.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::domain::candle::Candle;
use crate::domain::category::{classify, Category};
use crate::domain::error::PapertrailError;
use crate::domain::indicator::{compute_snapshot, IndicatorParams};
use crate::domain::scoring::{
    market_metrics, rank_signals, score_symbol, OpportunitySignal, ScoringConfig,
};
use crate::ports::market_data_port::MarketDataFeed;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Soft budget per feed call. A call that returns later than this is
    /// treated as failed and retried.
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1),
    /// capped at `max_delay_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub workers: usize,
    pub interval: String,
    pub lookback: usize,
    pub retry: RetryPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            workers: 4,
            interval: "1d".to_string(),
            lookback: 90,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub signals: Vec<OpportunitySignal>,
    pub skipped: Vec<SkippedSymbol>,
}

/// Outcome of a retried call: the value or the last error, plus how many
/// attempts were made.
pub struct Attempted<T> {
    pub result: Result<T, PapertrailError>,
    pub attempts: u32,
}

fn is_retryable(err: &PapertrailError) -> bool {
    matches!(err, PapertrailError::DataUnavailable { .. })
}

/// Sleep for `delay` in short slices so cancellation is noticed promptly.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancelToken) -> bool {
    let slice = Duration::from_millis(25);
    let deadline = Instant::now() + delay;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(slice.min(deadline - now));
    }
    false
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted.
pub fn with_retry<T>(
    context: &str,
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut call: impl FnMut() -> Result<T, PapertrailError>,
) -> Attempted<T> {
    let max_attempts = policy.max_attempts.max(1);
    let budget = Duration::from_millis(policy.call_timeout_ms);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Attempted {
                result: Err(PapertrailError::Cancelled),
                attempts: attempt - 1,
            };
        }

        let started = Instant::now();
        let outcome = match call() {
            Ok(_) if policy.call_timeout_ms > 0 && started.elapsed() > budget => Err(
                PapertrailError::data_unavailable(
                    context,
                    format!("feed call exceeded {}ms", policy.call_timeout_ms),
                ),
            ),
            other => other,
        };

        match outcome {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(err) if attempt >= max_attempts || !is_retryable(&err) => {
                return Attempted {
                    result: Err(err),
                    attempts: attempt,
                };
            }
            Err(err) => {
                let delay = policy.backoff(attempt);
                warn!(
                    context,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "feed call failed, retrying"
                );
                if !sleep_unless_cancelled(delay, cancel) {
                    return Attempted {
                        result: Err(PapertrailError::Cancelled),
                        attempts: attempt,
                    };
                }
                attempt += 1;
            }
        }
    }
}

enum SymbolOutcome {
    Scored(OpportunitySignal),
    Skipped(SkippedSymbol),
    Cancelled,
}

pub struct Scanner<'a> {
    feed: &'a dyn MarketDataFeed,
    config: ScanConfig,
    params: IndicatorParams,
    scoring: ScoringConfig,
}

impl<'a> Scanner<'a> {
    pub fn new(
        feed: &'a dyn MarketDataFeed,
        config: ScanConfig,
        params: IndicatorParams,
        scoring: ScoringConfig,
    ) -> Self {
        Scanner {
            feed,
            config,
            params,
            scoring,
        }
    }

    /// Score `symbols` and return ranked signals plus the symbols the feed
    /// could not serve.
    ///
    /// `category` is applied before any feed call. Returns `Cancelled` with
    /// no partial results if `cancel` fires before the batch completes.
    pub fn score_opportunities(
        &self,
        symbols: &[String],
        min_score: f64,
        category: Option<Category>,
        cancel: &CancelToken,
    ) -> Result<ScanReport, PapertrailError> {
        let mut wanted: Vec<String> = Vec::with_capacity(symbols.len());
        for raw in symbols {
            let symbol = raw.trim().to_uppercase();
            if symbol.is_empty() {
                return Err(PapertrailError::invalid_input("empty symbol in scan list"));
            }
            if category.is_none_or(|c| classify(&symbol) == c) && !wanted.contains(&symbol) {
                wanted.push(symbol);
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()
            .map_err(|e| PapertrailError::invalid_input(format!("scan pool: {e}")))?;

        info!(
            symbols = wanted.len(),
            workers = self.config.workers,
            min_score,
            "starting opportunity scan"
        );

        let outcomes: Vec<SymbolOutcome> = pool.install(|| {
            wanted
                .par_iter()
                .map(|symbol| self.scan_symbol(symbol, cancel))
                .collect()
        });

        if cancel.is_cancelled()
            || outcomes
                .iter()
                .any(|o| matches!(o, SymbolOutcome::Cancelled))
        {
            warn!("opportunity scan cancelled, discarding results");
            return Err(PapertrailError::Cancelled);
        }

        let mut signals = Vec::new();
        let mut skipped = Vec::new();
        for outcome in outcomes {
            match outcome {
                SymbolOutcome::Scored(signal) => signals.push(signal),
                SymbolOutcome::Skipped(skip) => skipped.push(skip),
                SymbolOutcome::Cancelled => {}
            }
        }

        let signals = rank_signals(signals, min_score, category);
        info!(
            ranked = signals.len(),
            skipped = skipped.len(),
            "opportunity scan finished"
        );
        Ok(ScanReport { signals, skipped })
    }

    fn scan_symbol(&self, symbol: &str, cancel: &CancelToken) -> SymbolOutcome {
        if cancel.is_cancelled() {
            return SymbolOutcome::Cancelled;
        }

        let fetched = with_retry(symbol, &self.config.retry, cancel, || {
            self.feed
                .get_candles(symbol, &self.config.interval, self.config.lookback)
        });
        let candles = match fetched.result {
            Ok(candles) => candles,
            Err(PapertrailError::Cancelled) => return SymbolOutcome::Cancelled,
            Err(err) => {
                warn!(symbol, attempts = fetched.attempts, error = %err, "skipping symbol");
                return SymbolOutcome::Skipped(SkippedSymbol {
                    symbol: symbol.to_string(),
                    reason: err.to_string(),
                    attempts: fetched.attempts,
                });
            }
        };

        SymbolOutcome::Scored(self.score_candles(symbol, &candles, Utc::now()))
    }

    /// Score one symbol's history. Short history or dead volume yields an
    /// INSUFFICIENT_DATA signal rather than an error.
    pub fn score_candles(
        &self,
        symbol: &str,
        candles: &[Candle],
        computed_at: DateTime<Utc>,
    ) -> OpportunitySignal {
        if candles.is_empty() {
            return OpportunitySignal::insufficient_data(symbol, "no candle history", computed_at);
        }
        let metrics = match market_metrics(symbol, candles, &self.scoring) {
            Ok(m) => m,
            Err(err) => {
                debug!(symbol, reason = %err, "not enough data to score");
                return OpportunitySignal::insufficient_data(symbol, &err.to_string(), computed_at);
            }
        };
        let snapshot = compute_snapshot(symbol, candles, &self.params);
        score_symbol(symbol, &snapshot, &metrics, &self.scoring, computed_at)
    }
}
