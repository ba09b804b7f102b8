//! Per-user watchlists: ordered, duplicate-free symbol sets.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::domain::account::normalize_symbol;
use crate::domain::error::PapertrailError;
use crate::domain::scoring::OpportunitySignal;
use crate::ports::ledger_store_port::WatchlistStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watchlist {
    symbols: Vec<String>,
}

impl Watchlist {
    pub fn from_symbols(symbols: Vec<String>) -> Self {
        let mut list = Watchlist::default();
        for s in symbols {
            list.add(s);
        }
        list
    }

    /// Append `symbol` unless present. Returns whether the list changed.
    pub fn add(&mut self, symbol: String) -> bool {
        if self.contains(&symbol) {
            return false;
        }
        self.symbols.push(symbol);
        true
    }

    /// Returns whether the list changed.
    pub fn remove(&mut self, symbol: &str) -> bool {
        let before = self.symbols.len();
        self.symbols.retain(|s| s != symbol);
        self.symbols.len() != before
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Watchlists for every user, written through to the store on change.
pub struct WatchlistManager {
    store: Arc<dyn WatchlistStore>,
    lists: RwLock<HashMap<String, Watchlist>>,
}

fn normalize_user(user: &str) -> Result<String, PapertrailError> {
    let user = user.trim();
    if user.is_empty() {
        return Err(PapertrailError::invalid_input("user id must not be empty"));
    }
    Ok(user.to_string())
}

impl WatchlistManager {
    pub fn open(store: Arc<dyn WatchlistStore>) -> Result<Self, PapertrailError> {
        let lists = store
            .load_watchlists()?
            .into_iter()
            .map(|(user, symbols)| (user, Watchlist::from_symbols(symbols)))
            .collect();
        Ok(WatchlistManager {
            store,
            lists: RwLock::new(lists),
        })
    }

    fn update(
        &self,
        user: &str,
        change: impl FnOnce(&mut Watchlist) -> bool,
    ) -> Result<Vec<String>, PapertrailError> {
        let user = normalize_user(user)?;
        let mut lists = self.lists.write();
        let mut working = lists.get(&user).cloned().unwrap_or_default();
        if change(&mut working) {
            self.store.save_watchlist(&user, working.symbols())?;
            lists.insert(user, working.clone());
        }
        Ok(working.symbols)
    }

    /// Idempotent append. Returns the list after the call.
    pub fn add(&self, user: &str, symbol: &str) -> Result<Vec<String>, PapertrailError> {
        let symbol = normalize_symbol(symbol)?;
        let list = self.update(user, |w| w.add(symbol.clone()))?;
        info!(user, symbol = %symbol, "watchlist add");
        Ok(list)
    }

    /// Removing an absent symbol is a no-op.
    pub fn remove(&self, user: &str, symbol: &str) -> Result<Vec<String>, PapertrailError> {
        let symbol = normalize_symbol(symbol)?;
        let list = self.update(user, |w| w.remove(&symbol))?;
        info!(user, symbol = %symbol, "watchlist remove");
        Ok(list)
    }

    pub fn list(&self, user: &str) -> Result<Vec<String>, PapertrailError> {
        let user = normalize_user(user)?;
        Ok(self
            .lists
            .read()
            .get(&user)
            .map(|w| w.symbols().to_vec())
            .unwrap_or_default())
    }

    /// Add the symbols of `signals`, in order, as one write.
    pub fn add_from_signals(
        &self,
        user: &str,
        signals: &[OpportunitySignal],
    ) -> Result<Vec<String>, PapertrailError> {
        let symbols = signals
            .iter()
            .map(|s| normalize_symbol(&s.symbol))
            .collect::<Result<Vec<_>, _>>()?;
        self.update(user, |w| {
            symbols
                .into_iter()
                .fold(false, |changed, s| w.add(s) || changed)
        })
    }
}
