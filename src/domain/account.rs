//! Account state: cash, positions, transaction log and performance records.
//!
//! Every mutation validates before it touches anything, so a rejected
//! operation leaves the account exactly as it was.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

use crate::domain::error::PapertrailError;
use crate::domain::performance::{CloseReason, PerformanceRecord, PerformanceTracker};
use crate::domain::position::Position;
use crate::domain::transaction::{Side, Transaction};

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub initial_balance: Decimal,
    pub cash_balance: Decimal,
    pub positions: BTreeMap<String, Position>,
    pub transactions: Vec<Transaction>,
    pub performance: Vec<PerformanceRecord>,
}

/// Trim and upper-case a symbol, rejecting empty ones.
pub fn normalize_symbol(symbol: &str) -> Result<String, PapertrailError> {
    let s = symbol.trim().to_uppercase();
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return Err(PapertrailError::invalid_input(format!(
            "malformed symbol {symbol:?}"
        )));
    }
    Ok(s)
}

fn out_of_range(what: &str) -> PapertrailError {
    PapertrailError::invalid_input(format!("{what} is out of range"))
}

fn require_positive(what: &str, value: Decimal) -> Result<(), PapertrailError> {
    if value <= Decimal::ZERO {
        return Err(PapertrailError::invalid_input(format!(
            "{what} must be positive, got {value}"
        )));
    }
    Ok(())
}

impl Account {
    pub fn new(id: &str, initial_balance: Decimal) -> Result<Self, PapertrailError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(PapertrailError::invalid_input("account id must not be empty"));
        }
        if initial_balance < Decimal::ZERO {
            return Err(PapertrailError::invalid_input(format!(
                "initial balance must not be negative, got {initial_balance}"
            )));
        }
        Ok(Account {
            id: id.to_string(),
            initial_balance,
            cash_balance: initial_balance,
            positions: BTreeMap::new(),
            transactions: Vec::new(),
            performance: Vec::new(),
        })
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    fn next_seq(&self) -> u64 {
        self.transactions.last().map_or(1, |t| t.seq + 1)
    }

    fn active_record(&self, symbol: &str) -> Option<&PerformanceRecord> {
        self.performance
            .iter()
            .rev()
            .find(|r| r.symbol == symbol && r.is_active())
    }

    fn active_record_mut(&mut self, symbol: &str) -> Option<&mut PerformanceRecord> {
        self.performance
            .iter_mut()
            .rev()
            .find(|r| r.symbol == symbol && r.is_active())
    }

    /// Buy `quantity` of `symbol` at `price`.
    pub fn apply_buy(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Transaction, PapertrailError> {
        let symbol = normalize_symbol(symbol)?;
        require_positive("quantity", quantity)?;
        require_positive("price", price)?;

        let amount = quantity
            .checked_mul(price)
            .ok_or_else(|| out_of_range("order value"))?;
        if amount > self.cash_balance {
            return Err(PapertrailError::InsufficientFunds {
                required: amount,
                available: self.cash_balance,
            });
        }
        let investment = match self.active_record(&symbol) {
            Some(record) => Some(
                record
                    .initial_investment
                    .checked_add(amount)
                    .ok_or_else(|| out_of_range("initial investment"))?,
            ),
            None => None,
        };

        // Position arithmetic is the last fallible step.
        match self.positions.get_mut(&symbol) {
            Some(pos) => pos.add(quantity, price)?,
            None => {
                let pos = Position::open(&symbol, quantity, price, at)?;
                self.positions.insert(symbol.clone(), pos);
            }
        }
        self.cash_balance -= amount;

        match investment {
            Some(total) => {
                if let Some(record) = self.active_record_mut(&symbol) {
                    record.initial_investment = total;
                }
            }
            None => self
                .performance
                .push(PerformanceRecord::open(&symbol, amount, at)),
        }

        let tx = Transaction {
            seq: self.next_seq(),
            timestamp: at,
            symbol,
            side: Side::Buy,
            quantity,
            price,
            amount,
            resulting_balance: self.cash_balance,
        };
        self.transactions.push(tx.clone());
        Ok(tx)
    }

    /// Sell `quantity` of a held `symbol` at `price`.
    pub fn apply_sell(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Transaction, PapertrailError> {
        let symbol = normalize_symbol(symbol)?;
        require_positive("quantity", quantity)?;
        require_positive("price", price)?;

        let held = self
            .positions
            .get(&symbol)
            .map(|p| p.quantity)
            .ok_or_else(|| PapertrailError::NoSuchPosition {
                symbol: symbol.clone(),
            })?;
        if quantity > held {
            return Err(PapertrailError::InsufficientQuantity {
                symbol,
                requested: quantity,
                held,
            });
        }

        let proceeds = quantity
            .checked_mul(price)
            .ok_or_else(|| out_of_range("sale proceeds"))?;
        let cash = self
            .cash_balance
            .checked_add(proceeds)
            .ok_or_else(|| out_of_range("cash balance"))?;
        let cost_removed = self
            .positions
            .get(&symbol)
            .map_or(Decimal::ZERO, |p| p.cost_of(quantity));
        let realized = match self.active_record(&symbol) {
            Some(record) => Some(
                proceeds
                    .checked_sub(cost_removed)
                    .and_then(|gain| record.realized_pnl.checked_add(gain))
                    .ok_or_else(|| out_of_range("realized P&L"))?,
            ),
            None => None,
        };

        let mut liquidated = false;
        if let Some(pos) = self.positions.get_mut(&symbol) {
            pos.reduce(quantity);
            liquidated = pos.is_closed();
        }
        if liquidated {
            self.positions.remove(&symbol);
        }
        self.cash_balance = cash;

        if let (Some(record), Some(total)) = (self.active_record_mut(&symbol), realized) {
            record.realized_pnl = total;
            if liquidated {
                record.close(CloseReason::Liquidated, at);
            }
        }

        let tx = Transaction {
            seq: self.next_seq(),
            timestamp: at,
            symbol,
            side: Side::Sell,
            quantity,
            price,
            amount: proceeds,
            resulting_balance: self.cash_balance,
        };
        self.transactions.push(tx.clone());
        Ok(tx)
    }

    pub fn expire_records(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        PerformanceTracker::expire(&mut self.performance, now, window)
    }

    /// Rebuild an account by replaying its transaction log in order.
    pub fn replay(
        id: &str,
        initial_balance: Decimal,
        transactions: &[Transaction],
    ) -> Result<Account, PapertrailError> {
        let mut account = Account::new(id, initial_balance)?;
        for tx in transactions {
            match tx.side {
                Side::Buy => account.apply_buy(&tx.symbol, tx.quantity, tx.price, tx.timestamp)?,
                Side::Sell => account.apply_sell(&tx.symbol, tx.quantity, tx.price, tx.timestamp)?,
            };
        }
        Ok(account)
    }

    /// Check cash, positions and every logged running balance against a
    /// replay of the log.
    pub fn reconcile(&self) -> Result<(), PapertrailError> {
        let mismatch = |reason: String| PapertrailError::ReconciliationMismatch {
            id: self.id.clone(),
            reason,
        };

        let replayed = Account::replay(&self.id, self.initial_balance, &self.transactions)
            .map_err(|e| mismatch(format!("log does not replay: {e}")))?;

        for (logged, derived) in self.transactions.iter().zip(&replayed.transactions) {
            if logged.resulting_balance != derived.resulting_balance {
                return Err(mismatch(format!(
                    "transaction {} records balance {}, replay gives {}",
                    logged.seq, logged.resulting_balance, derived.resulting_balance
                )));
            }
        }
        if replayed.cash_balance != self.cash_balance {
            return Err(mismatch(format!(
                "cash balance {} but log implies {}",
                self.cash_balance, replayed.cash_balance
            )));
        }
        for symbol in self.positions.keys().chain(replayed.positions.keys()) {
            let held = self.positions.get(symbol);
            let derived = replayed.positions.get(symbol);
            let same = match (held, derived) {
                (Some(a), Some(b)) => a.quantity == b.quantity && a.cost_basis == b.cost_basis,
                _ => false,
            };
            if !same {
                return Err(mismatch(format!(
                    "position {symbol}: held {:?}, log implies {:?}",
                    held.map(|p| p.quantity),
                    derived.map(|p| p.quantity)
                )));
            }
        }
        Ok(())
    }

    /// Cash plus positions marked at `quotes`. Positions without a quote are
    /// valued at cost.
    pub fn total_equity(&self, quotes: &HashMap<String, Decimal>) -> Decimal {
        self.positions
            .values()
            .map(|pos| match quotes.get(&pos.symbol) {
                Some(&price) => pos.market_value(price),
                None => pos.cost_basis,
            })
            .fold(self.cash_balance, Decimal::saturating_add)
    }
}
