//! SQLite ledger and watchlist store.
//!
//! Decimals and timestamps are stored as TEXT so values round-trip exactly.
//! Each ledger commit is a single SQLite transaction.

use crate::domain::account::Account;
use crate::domain::config_validation::positive_int;
use crate::domain::error::PapertrailError;
use crate::domain::performance::{CloseReason, PerformanceRecord};
use crate::domain::position::Position;
use crate::domain::transaction::Transaction;
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_store_port::{LedgerStore, WatchlistStore};
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> PapertrailError {
    PapertrailError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> PapertrailError {
    PapertrailError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn conversion<E>(column: usize, e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, e.into())
}

fn decimal_at(row: &Row<'_>, column: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(column)?;
    Decimal::from_str(&text).map_err(|e| conversion(column, e))
}

fn timestamp_at(row: &Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(column, e))
}

fn optional_timestamp_at(row: &Row<'_>, column: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(column)?;
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion(column, e))
    })
    .transpose()
}

fn parsed_at<T: FromStr<Err = String>>(row: &Row<'_>, column: usize) -> rusqlite::Result<T> {
    let text: String = row.get(column)?;
    T::from_str(&text).map_err(|e| conversion(column, e))
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PapertrailError> {
        let db_path = config.require_string("sqlite", "path")?;

        let pool_size = positive_int(config, "sqlite", "pool_size", 4)? as u32;

        let manager = SqliteConnectionManager::file(&db_path)
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;"));
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, PapertrailError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;

        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, PapertrailError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), PapertrailError> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                initial_balance TEXT NOT NULL,
                cash_balance TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS positions (
                account_id TEXT NOT NULL REFERENCES accounts(id),
                symbol TEXT NOT NULL,
                quantity TEXT NOT NULL,
                avg_cost TEXT NOT NULL,
                cost_basis TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                PRIMARY KEY (account_id, symbol)
            );
            CREATE TABLE IF NOT EXISTS transactions (
                account_id TEXT NOT NULL REFERENCES accounts(id),
                seq INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                amount TEXT NOT NULL,
                resulting_balance TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (account_id, seq)
            );
            CREATE TABLE IF NOT EXISTS performance_records (
                account_id TEXT NOT NULL REFERENCES accounts(id),
                symbol TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                initial_investment TEXT NOT NULL,
                status TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                closed_at TEXT,
                close_reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_performance_account ON performance_records(account_id);
            CREATE TABLE IF NOT EXISTS watchlists (
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                ord INTEGER NOT NULL,
                PRIMARY KEY (user_id, symbol)
            );",
        )
        .map_err(query_err)?;

        Ok(())
    }

    fn load_account(conn: &Connection, id: &str) -> rusqlite::Result<Option<Account>> {
        let header = conn
            .query_row(
                "SELECT id, initial_balance, cash_balance FROM accounts WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, decimal_at(row, 1)?, decimal_at(row, 2)?)),
            )
            .optional()?;
        let Some((id, initial_balance, cash_balance)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT symbol, quantity, avg_cost, cost_basis, opened_at
             FROM positions WHERE account_id = ?1 ORDER BY symbol",
        )?;
        let positions = stmt
            .query_map(params![id], |row| {
                Ok(Position {
                    symbol: row.get(0)?,
                    quantity: decimal_at(row, 1)?,
                    avg_cost: decimal_at(row, 2)?,
                    cost_basis: decimal_at(row, 3)?,
                    opened_at: timestamp_at(row, 4)?,
                })
            })?
            .map(|p| p.map(|p| (p.symbol.clone(), p)))
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        let mut stmt = conn.prepare(
            "SELECT seq, timestamp, symbol, side, quantity, price, amount, resulting_balance
             FROM transactions WHERE account_id = ?1 ORDER BY seq",
        )?;
        let transactions = stmt
            .query_map(params![id], |row| {
                Ok(Transaction {
                    seq: row.get::<_, i64>(0)? as u64,
                    timestamp: timestamp_at(row, 1)?,
                    symbol: row.get(2)?,
                    side: parsed_at(row, 3)?,
                    quantity: decimal_at(row, 4)?,
                    price: decimal_at(row, 5)?,
                    amount: decimal_at(row, 6)?,
                    resulting_balance: decimal_at(row, 7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT symbol, opened_at, initial_investment, status, realized_pnl, closed_at, close_reason
             FROM performance_records WHERE account_id = ?1 ORDER BY rowid",
        )?;
        let performance = stmt
            .query_map(params![id], |row| {
                let close_reason: Option<String> = row.get(6)?;
                Ok(PerformanceRecord {
                    symbol: row.get(0)?,
                    opened_at: timestamp_at(row, 1)?,
                    initial_investment: decimal_at(row, 2)?,
                    status: parsed_at(row, 3)?,
                    realized_pnl: decimal_at(row, 4)?,
                    closed_at: optional_timestamp_at(row, 5)?,
                    close_reason: close_reason
                        .map(|r| r.parse::<CloseReason>().map_err(|e| conversion(6, e)))
                        .transpose()?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(Account {
            id,
            initial_balance,
            cash_balance,
            positions,
            transactions,
            performance,
        }))
    }
}

impl LedgerStore for SqliteStore {
    fn load_accounts(&self) -> Result<Vec<Account>, PapertrailError> {
        let conn = self.conn()?;
        let ids = {
            let mut stmt = conn
                .prepare("SELECT id FROM accounts ORDER BY id")
                .map_err(query_err)?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(query_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(query_err)?;
            ids
        };

        let mut accounts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(account) = Self::load_account(&conn, &id).map_err(query_err)? {
                accounts.push(account);
            }
        }
        debug!(accounts = accounts.len(), "loaded accounts from sqlite");
        Ok(accounts)
    }

    fn create_account(&self, account: &Account) -> Result<(), PapertrailError> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO accounts (id, initial_balance, cash_balance)
                 VALUES (?1, ?2, ?3)",
                params![
                    account.id,
                    account.initial_balance.to_string(),
                    account.cash_balance.to_string()
                ],
            )
            .map_err(query_err)?;
        if inserted == 0 {
            return Err(PapertrailError::AccountExists {
                id: account.id.clone(),
            });
        }
        Ok(())
    }

    fn commit(
        &self,
        account: &Account,
        base_seq: u64,
        appended: &[Transaction],
    ) -> Result<(), PapertrailError> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front so the head check and the
        // writes below see the same log.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let head: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM transactions WHERE account_id = ?1",
                params![account.id],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        if head as u64 != base_seq {
            debug!(account = %account.id, expected = base_seq, found = head, "stale commit");
            return Err(PapertrailError::StaleAccount {
                id: account.id.clone(),
                expected: base_seq,
                found: head as u64,
            });
        }

        let updated = tx
            .execute(
                "UPDATE accounts SET cash_balance = ?2 WHERE id = ?1",
                params![account.id, account.cash_balance.to_string()],
            )
            .map_err(query_err)?;
        if updated == 0 {
            return Err(PapertrailError::AccountNotFound {
                id: account.id.clone(),
            });
        }

        tx.execute(
            "DELETE FROM positions WHERE account_id = ?1",
            params![account.id],
        )
        .map_err(query_err)?;
        for pos in account.positions.values() {
            tx.execute(
                "INSERT INTO positions (account_id, symbol, quantity, avg_cost, cost_basis, opened_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    account.id,
                    pos.symbol,
                    pos.quantity.to_string(),
                    pos.avg_cost.to_string(),
                    pos.cost_basis.to_string(),
                    pos.opened_at.to_rfc3339()
                ],
            )
            .map_err(query_err)?;
        }

        for t in appended {
            tx.execute(
                "INSERT INTO transactions
                 (account_id, seq, symbol, side, quantity, price, amount, resulting_balance, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    account.id,
                    t.seq as i64,
                    t.symbol,
                    t.side.to_string(),
                    t.quantity.to_string(),
                    t.price.to_string(),
                    t.amount.to_string(),
                    t.resulting_balance.to_string(),
                    t.timestamp.to_rfc3339()
                ],
            )
            .map_err(query_err)?;
        }

        tx.execute(
            "DELETE FROM performance_records WHERE account_id = ?1",
            params![account.id],
        )
        .map_err(query_err)?;
        for r in &account.performance {
            tx.execute(
                "INSERT INTO performance_records
                 (account_id, symbol, opened_at, initial_investment, status, realized_pnl, closed_at, close_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    account.id,
                    r.symbol,
                    r.opened_at.to_rfc3339(),
                    r.initial_investment.to_string(),
                    r.status.to_string(),
                    r.realized_pnl.to_string(),
                    r.closed_at.map(|t| t.to_rfc3339()),
                    r.close_reason.map(|c| c.to_string())
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(())
    }
}

impl WatchlistStore for SqliteStore {
    fn load_watchlists(&self) -> Result<Vec<(String, Vec<String>)>, PapertrailError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT user_id, symbol FROM watchlists ORDER BY user_id, ord")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(query_err)?;

        let mut lists: Vec<(String, Vec<String>)> = Vec::new();
        for row in rows {
            let (user, symbol) = row.map_err(query_err)?;
            match lists.last_mut() {
                Some((last, symbols)) if *last == user => symbols.push(symbol),
                _ => lists.push((user, vec![symbol])),
            }
        }
        Ok(lists)
    }

    fn save_watchlist(&self, user: &str, symbols: &[String]) -> Result<(), PapertrailError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        tx.execute("DELETE FROM watchlists WHERE user_id = ?1", params![user])
            .map_err(query_err)?;
        for (ord, symbol) in symbols.iter().enumerate() {
            tx.execute(
                "INSERT INTO watchlists (user_id, symbol, ord) VALUES (?1, ?2, ?3)",
                params![user, symbol, ord as i64],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)?;
        Ok(())
    }
}
