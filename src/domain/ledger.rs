//! Ledger service: the single writer for every account.
//!
//! Each account sits behind its own mutex; the map of accounts is behind a
//! read-write lock that is only write-locked to add an account. A mutation
//! runs on a working copy, is persisted through the store in one commit and
//! only then replaces the in-memory account. Feed I/O always happens before
//! an account lock is taken.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::account::Account;
use crate::domain::error::PapertrailError;
use crate::domain::performance::{PerformanceSummary, PerformanceTracker};
use crate::domain::position::Position;
use crate::domain::transaction::Transaction;
use crate::ports::ledger_store_port::LedgerStore;
use crate::ports::market_data_port::MarketDataFeed;

pub const DEFAULT_TRACKING_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub tracking_window: Duration,
    /// Balance used by `open-account` when none is given.
    pub default_initial_balance: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            tracking_window: Duration::days(DEFAULT_TRACKING_WINDOW_DAYS),
            default_initial_balance: Decimal::from(100_000),
        }
    }
}

/// Immutable view of an account at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    pub account_id: String,
    pub initial_balance: Decimal,
    pub cash_balance: Decimal,
    pub positions: Vec<Position>,
    pub transaction_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionValuation {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub cost_basis: Decimal,
    pub price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
}

/// Mark-to-market view. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    pub account_id: String,
    pub cash_balance: Decimal,
    pub positions: Vec<PositionValuation>,
    pub total_equity: Decimal,
    /// Symbols whose quote could not be fetched; valued at cost.
    pub unpriced: Vec<String>,
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    accounts: RwLock<HashMap<String, Arc<Mutex<Account>>>>,
    config: LedgerConfig,
}

fn snapshot_of(account: &Account) -> PortfolioSnapshot {
    PortfolioSnapshot {
        account_id: account.id.clone(),
        initial_balance: account.initial_balance,
        cash_balance: account.cash_balance,
        positions: account.positions.values().cloned().collect(),
        transaction_count: account.transactions.len(),
    }
}

/// Fetch latest quotes for `symbols`, dropping the ones the feed cannot serve.
pub fn fetch_quotes(feed: &dyn MarketDataFeed, symbols: &[String]) -> HashMap<String, Decimal> {
    let mut quotes = HashMap::with_capacity(symbols.len());
    for symbol in symbols {
        match feed.get_latest_price(symbol) {
            Ok(price) => {
                quotes.insert(symbol.clone(), price);
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "no quote"),
        }
    }
    quotes
}

impl Ledger {
    /// Load every stored account.
    pub fn open(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Result<Self, PapertrailError> {
        let loaded = store.load_accounts()?;
        let accounts = loaded
            .into_iter()
            .map(|a| (a.id.clone(), Arc::new(Mutex::new(a))))
            .collect::<HashMap<_, _>>();
        info!(accounts = accounts.len(), "ledger opened");
        Ok(Ledger {
            store,
            accounts: RwLock::new(accounts),
            config,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn account_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.accounts.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn open_account(
        &self,
        id: &str,
        initial_balance: Decimal,
    ) -> Result<PortfolioSnapshot, PapertrailError> {
        let account = Account::new(id, initial_balance)?;
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&account.id) {
            return Err(PapertrailError::AccountExists { id: account.id });
        }
        self.store.create_account(&account)?;
        info!(account = %account.id, initial_balance = %initial_balance, "account opened");
        let snapshot = snapshot_of(&account);
        accounts.insert(account.id.clone(), Arc::new(Mutex::new(account)));
        Ok(snapshot)
    }

    fn handle(&self, id: &str) -> Result<Arc<Mutex<Account>>, PapertrailError> {
        self.accounts
            .read()
            .get(id.trim())
            .cloned()
            .ok_or_else(|| PapertrailError::AccountNotFound { id: id.to_string() })
    }

    /// Apply `change` to a copy of the account, persist it and swap it in.
    /// On any error the account is left untouched, except that a stale
    /// commit reloads the account from the store so a retry sees the other
    /// writer's changes.
    fn mutate<T>(
        &self,
        id: &str,
        change: impl FnOnce(&mut Account) -> Result<T, PapertrailError>,
    ) -> Result<T, PapertrailError> {
        let handle = self.handle(id)?;
        let mut current = handle.lock();
        let mut working = current.clone();
        let out = change(&mut working)?;
        let base_seq = current.transactions.last().map_or(0, |t| t.seq);
        let appended = &working.transactions[current.transactions.len()..];
        match self.store.commit(&working, base_seq, appended) {
            Ok(()) => {}
            Err(e @ PapertrailError::StaleAccount { .. }) => {
                warn!(account = %current.id, error = %e, "reloading account");
                if let Ok(stored) = self.store.load_accounts() {
                    if let Some(fresh) = stored.into_iter().find(|a| a.id == current.id) {
                        *current = fresh;
                    }
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        }
        *current = working;
        Ok(out)
    }

    pub fn buy(
        &self,
        id: &str,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Transaction, PapertrailError> {
        self.buy_at(id, symbol, quantity, price, Utc::now())
    }

    pub fn buy_at(
        &self,
        id: &str,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Transaction, PapertrailError> {
        let tx = self.mutate(id, |acct| acct.apply_buy(symbol, quantity, price, at))?;
        info!(
            account = id,
            symbol = %tx.symbol,
            quantity = %tx.quantity,
            price = %tx.price,
            balance = %tx.resulting_balance,
            "BUY committed"
        );
        Ok(tx)
    }

    pub fn sell(
        &self,
        id: &str,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Transaction, PapertrailError> {
        self.sell_at(id, symbol, quantity, price, Utc::now())
    }

    pub fn sell_at(
        &self,
        id: &str,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Transaction, PapertrailError> {
        let tx = self.mutate(id, |acct| acct.apply_sell(symbol, quantity, price, at))?;
        info!(
            account = id,
            symbol = %tx.symbol,
            quantity = %tx.quantity,
            price = %tx.price,
            balance = %tx.resulting_balance,
            "SELL committed"
        );
        Ok(tx)
    }

    pub fn get_portfolio(&self, id: &str) -> Result<PortfolioSnapshot, PapertrailError> {
        let handle = self.handle(id)?;
        let account = handle.lock();
        Ok(snapshot_of(&account))
    }

    /// The most recent `limit` transactions (all when `None`), oldest first.
    pub fn get_transactions(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, PapertrailError> {
        let handle = self.handle(id)?;
        let account = handle.lock();
        let log = &account.transactions;
        let start = limit.map_or(0, |n| log.len().saturating_sub(n));
        Ok(log[start..].to_vec())
    }

    /// Close records whose tracking window has elapsed, committing the
    /// change. Returns how many records expired.
    pub fn expire_at(&self, id: &str, now: DateTime<Utc>) -> Result<usize, PapertrailError> {
        let window = self.config.tracking_window;
        {
            let handle = self.handle(id)?;
            let account = handle.lock();
            if !account.performance.iter().any(|r| r.is_expired(now, window)) {
                return Ok(0);
            }
        }
        let expired = self.mutate(id, |acct| Ok(acct.expire_records(now, window)))?;
        if expired > 0 {
            info!(account = id, expired, "performance records expired");
        }
        Ok(expired)
    }

    fn held_symbols(&self, id: &str) -> Result<Vec<String>, PapertrailError> {
        let handle = self.handle(id)?;
        let account = handle.lock();
        Ok(account.positions.keys().cloned().collect())
    }

    pub fn get_performance_summary(
        &self,
        id: &str,
        feed: &dyn MarketDataFeed,
    ) -> Result<PerformanceSummary, PapertrailError> {
        let quotes = fetch_quotes(feed, &self.held_symbols(id)?);
        self.performance_summary_at(id, &quotes, Utc::now())
    }

    /// Summary against already-fetched quotes; applies expiry as of `now`.
    pub fn performance_summary_at(
        &self,
        id: &str,
        quotes: &HashMap<String, Decimal>,
        now: DateTime<Utc>,
    ) -> Result<PerformanceSummary, PapertrailError> {
        self.expire_at(id, now)?;
        let handle = self.handle(id)?;
        let account = handle.lock();
        Ok(PerformanceTracker::summarize(
            &account.performance,
            &account.positions,
            quotes,
        ))
    }

    pub fn valuation(
        &self,
        id: &str,
        feed: &dyn MarketDataFeed,
    ) -> Result<Valuation, PapertrailError> {
        let quotes = fetch_quotes(feed, &self.held_symbols(id)?);
        self.valuation_with(id, &quotes)
    }

    pub fn valuation_with(
        &self,
        id: &str,
        quotes: &HashMap<String, Decimal>,
    ) -> Result<Valuation, PapertrailError> {
        let handle = self.handle(id)?;
        let account = handle.lock();

        let mut unpriced = Vec::new();
        let positions = account
            .positions
            .values()
            .map(|pos| {
                let price = quotes.get(&pos.symbol).copied();
                if price.is_none() {
                    unpriced.push(pos.symbol.clone());
                }
                PositionValuation {
                    symbol: pos.symbol.clone(),
                    quantity: pos.quantity,
                    avg_cost: pos.avg_cost,
                    cost_basis: pos.cost_basis,
                    price,
                    market_value: price.map(|p| pos.market_value(p)),
                    unrealized_pnl: price.map(|p| pos.unrealized_pnl(p)),
                }
            })
            .collect();

        Ok(Valuation {
            account_id: account.id.clone(),
            cash_balance: account.cash_balance,
            positions,
            total_equity: account.total_equity(quotes),
            unpriced,
        })
    }

    pub fn reconcile(&self, id: &str) -> Result<(), PapertrailError> {
        let handle = self.handle(id)?;
        let account = handle.lock();
        account.reconcile()?;
        info!(account = id, transactions = account.transactions.len(), "ledger reconciled");
        Ok(())
    }
}
