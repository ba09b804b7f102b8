//! Open position held by an account.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::error::PapertrailError;

fn overflow(what: &str) -> PapertrailError {
    PapertrailError::invalid_input(format!("{what} is out of range"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    /// Exact total cost of the quantity still held.
    pub cost_basis: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn open(
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Self, PapertrailError> {
        let cost_basis = quantity
            .checked_mul(price)
            .ok_or_else(|| overflow("position cost"))?;
        Ok(Position {
            symbol: symbol.to_string(),
            quantity,
            avg_cost: price,
            cost_basis,
            opened_at: at,
        })
    }

    /// Add to the position at `price`, reweighting the average cost. On
    /// overflow the position is left unchanged.
    pub fn add(&mut self, quantity: Decimal, price: Decimal) -> Result<(), PapertrailError> {
        let cost_basis = quantity
            .checked_mul(price)
            .and_then(|cost| self.cost_basis.checked_add(cost))
            .ok_or_else(|| overflow("position cost basis"))?;
        let total = self
            .quantity
            .checked_add(quantity)
            .ok_or_else(|| overflow("position quantity"))?;
        let avg_cost = cost_basis
            .checked_div(total)
            .ok_or_else(|| overflow("average cost"))?;

        self.cost_basis = cost_basis;
        self.quantity = total;
        self.avg_cost = avg_cost;
        Ok(())
    }

    /// Cost attributed to `quantity` units on the way out. Selling the whole
    /// position releases the exact remaining basis.
    pub fn cost_of(&self, quantity: Decimal) -> Decimal {
        if quantity >= self.quantity {
            self.cost_basis
        } else {
            quantity.saturating_mul(self.avg_cost)
        }
    }

    /// Remove `quantity` units and return the cost released. The average
    /// cost is unchanged by a partial reduction.
    pub fn reduce(&mut self, quantity: Decimal) -> Decimal {
        let released = self.cost_of(quantity);
        self.quantity -= quantity;
        self.cost_basis -= released;
        if self.quantity.is_zero() {
            self.cost_basis = Decimal::ZERO;
        }
        released
    }

    pub fn is_closed(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Marked value, saturating at the representable range.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity.saturating_mul(price)
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.market_value(price).saturating_sub(self.cost_basis)
    }
}
