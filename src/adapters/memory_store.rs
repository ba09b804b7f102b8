//! In-process store for tests and builds without SQLite.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::account::Account;
use crate::domain::error::PapertrailError;
use crate::domain::transaction::Transaction;
use crate::ports::ledger_store_port::{LedgerStore, WatchlistStore};

#[derive(Default)]
pub struct MemoryStore {
    accounts: Mutex<BTreeMap<String, Account>>,
    watchlists: Mutex<BTreeMap<String, Vec<String>>>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `commit` fail with a database error.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl LedgerStore for MemoryStore {
    fn load_accounts(&self) -> Result<Vec<Account>, PapertrailError> {
        Ok(self.accounts.lock().values().cloned().collect())
    }

    fn create_account(&self, account: &Account) -> Result<(), PapertrailError> {
        let mut accounts = self.accounts.lock();
        if accounts.contains_key(&account.id) {
            return Err(PapertrailError::AccountExists {
                id: account.id.clone(),
            });
        }
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn commit(
        &self,
        account: &Account,
        base_seq: u64,
        appended: &[Transaction],
    ) -> Result<(), PapertrailError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(PapertrailError::Database {
                reason: "commit rejected by test store".into(),
            });
        }
        let mut accounts = self.accounts.lock();
        let stored = accounts
            .get_mut(&account.id)
            .ok_or_else(|| PapertrailError::AccountNotFound {
                id: account.id.clone(),
            })?;
        let head = stored.transactions.last().map_or(0, |t| t.seq);
        if head != base_seq {
            return Err(PapertrailError::StaleAccount {
                id: account.id.clone(),
                expected: base_seq,
                found: head,
            });
        }
        let mut next = account.clone();
        next.transactions = stored.transactions.clone();
        next.transactions.extend_from_slice(appended);
        *stored = next;
        Ok(())
    }
}

impl WatchlistStore for MemoryStore {
    fn load_watchlists(&self) -> Result<Vec<(String, Vec<String>)>, PapertrailError> {
        Ok(self
            .watchlists
            .lock()
            .iter()
            .map(|(user, symbols)| (user.clone(), symbols.clone()))
            .collect())
    }

    fn save_watchlist(&self, user: &str, symbols: &[String]) -> Result<(), PapertrailError> {
        self.watchlists
            .lock()
            .insert(user.to_string(), symbols.to_vec());
        Ok(())
    }
}
