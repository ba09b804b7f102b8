//! Append-only ledger transactions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Position in the account's log, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    /// `quantity * price`: debited on BUY, credited on SELL.
    pub amount: Decimal,
    /// Cash balance immediately after this transaction.
    pub resulting_balance: Decimal,
}

impl Transaction {
    /// Signed effect on cash.
    pub fn cash_delta(&self) -> Decimal {
        match self.side {
            Side::Buy => -self.amount,
            Side::Sell => self.amount,
        }
    }
}
