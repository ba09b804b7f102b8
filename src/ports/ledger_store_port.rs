//! Persistence ports for ledger and watchlist state.

use crate::domain::account::Account;
use crate::domain::error::PapertrailError;
use crate::domain::transaction::Transaction;

/// Durable account storage.
///
/// `commit` must be all-or-nothing: after a failure the stored account is
/// exactly as it was before the call.
pub trait LedgerStore: Send + Sync {
    fn load_accounts(&self) -> Result<Vec<Account>, PapertrailError>;

    fn create_account(&self, account: &Account) -> Result<(), PapertrailError>;

    /// Persist `account`'s balance, positions and performance records and
    /// append `appended` to its transaction log.
    ///
    /// `base_seq` is the last transaction sequence number the caller loaded
    /// (0 for an empty log). If the stored log head differs, another writer
    /// got there first: nothing is written and `StaleAccount` is returned.
    fn commit(
        &self,
        account: &Account,
        base_seq: u64,
        appended: &[Transaction],
    ) -> Result<(), PapertrailError>;
}

/// Durable per-user watchlists.
pub trait WatchlistStore: Send + Sync {
    /// Every stored watchlist as `(user, symbols in insertion order)`.
    fn load_watchlists(&self) -> Result<Vec<(String, Vec<String>)>, PapertrailError>;

    /// Replace the stored list for `user`.
    fn save_watchlist(&self, user: &str, symbols: &[String]) -> Result<(), PapertrailError>;
}
