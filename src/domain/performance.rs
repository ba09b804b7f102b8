//! Position lifecycle tracking and P&L summaries.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::domain::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Liquidated,
    Expired,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Active => f.write_str("ACTIVE"),
            RecordStatus::Closed => f.write_str("CLOSED"),
        }
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(RecordStatus::Active),
            "CLOSED" => Ok(RecordStatus::Closed),
            other => Err(format!("unknown record status: {other}")),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Liquidated => f.write_str("LIQUIDATED"),
            CloseReason::Expired => f.write_str("EXPIRED"),
        }
    }
}

impl FromStr for CloseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LIQUIDATED" => Ok(CloseReason::Liquidated),
            "EXPIRED" => Ok(CloseReason::Expired),
            other => Err(format!("unknown close reason: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRecord {
    pub symbol: String,
    pub opened_at: DateTime<Utc>,
    pub initial_investment: Decimal,
    pub status: RecordStatus,
    pub realized_pnl: Decimal,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
}

impl PerformanceRecord {
    pub fn open(symbol: &str, investment: Decimal, at: DateTime<Utc>) -> Self {
        PerformanceRecord {
            symbol: symbol.to_string(),
            opened_at: at,
            initial_investment: investment,
            status: RecordStatus::Active,
            realized_pnl: Decimal::ZERO,
            closed_at: None,
            close_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }

    pub fn close(&mut self, reason: CloseReason, at: DateTime<Utc>) {
        self.status = RecordStatus::Closed;
        self.closed_at = Some(at);
        self.close_reason = Some(reason);
    }

    /// Realized P&L as a percentage of the initial investment.
    pub fn realized_pnl_percent(&self) -> Decimal {
        if self.initial_investment.is_zero() {
            Decimal::ZERO
        } else {
            self.realized_pnl
                .checked_div(self.initial_investment)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
                .unwrap_or(if self.realized_pnl.is_sign_negative() {
                    Decimal::MIN
                } else {
                    Decimal::MAX
                })
        }
    }

    /// True once strictly more than `window` has elapsed since opening.
    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.is_active() && now - self.opened_at > window
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceEntry {
    pub symbol: String,
    pub status: RecordStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    pub initial_investment: Decimal,
    pub realized_pnl: Decimal,
    pub realized_pnl_percent: Decimal,
    /// Only for ACTIVE records with a quote.
    pub unrealized_pnl: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PerformanceSummary {
    pub entries: Vec<PerformanceEntry>,
    pub total_realized: Decimal,
    pub total_unrealized: Decimal,
}

pub struct PerformanceTracker;

impl PerformanceTracker {
    /// Close every ACTIVE record whose window has elapsed. Returns how many
    /// records changed.
    pub fn expire(records: &mut [PerformanceRecord], now: DateTime<Utc>, window: Duration) -> usize {
        let mut closed = 0;
        for record in records.iter_mut().filter(|r| r.is_expired(now, window)) {
            record.close(CloseReason::Expired, now);
            closed += 1;
        }
        closed
    }

    /// Summarize records. ACTIVE records carry unrealized P&L from `quotes`
    /// against the held position; realized P&L accumulates from every sell.
    pub fn summarize(
        records: &[PerformanceRecord],
        positions: &BTreeMap<String, Position>,
        quotes: &HashMap<String, Decimal>,
    ) -> PerformanceSummary {
        let mut summary = PerformanceSummary::default();

        for record in records {
            let unrealized = if record.is_active() {
                match (positions.get(&record.symbol), quotes.get(&record.symbol)) {
                    (Some(pos), Some(&price)) => Some(pos.unrealized_pnl(price)),
                    _ => None,
                }
            } else {
                None
            };

            summary.total_realized = summary.total_realized.saturating_add(record.realized_pnl);
            if let Some(u) = unrealized {
                summary.total_unrealized = summary.total_unrealized.saturating_add(u);
            }
            summary.entries.push(PerformanceEntry {
                symbol: record.symbol.clone(),
                status: record.status,
                opened_at: record.opened_at,
                closed_at: record.closed_at,
                close_reason: record.close_reason,
                initial_investment: record.initial_investment,
                realized_pnl: record.realized_pnl,
                realized_pnl_percent: record.realized_pnl_percent(),
                unrealized_pnl: unrealized,
            });
        }

        summary
    }
}
