//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::csv_adapter::CsvFeed;
use crate::adapters::file_config_adapter::FileConfigAdapter;
#[cfg(not(feature = "sqlite"))]
use crate::adapters::memory_store::MemoryStore;
#[cfg(feature = "sqlite")]
use crate::adapters::sqlite_adapter::SqliteStore;
use crate::domain::category::Category;
use crate::domain::config_validation::{
    check_scan_covers_scoring, configured_symbols, load_indicator_params, load_ledger_config,
    load_scan_config, load_scoring_config, parse_symbols,
};
use crate::domain::error::PapertrailError;
use crate::domain::ledger::Ledger;
use crate::domain::scanner::{CancelToken, Scanner};
use crate::domain::watchlist::WatchlistManager;
use crate::ports::ledger_store_port::{LedgerStore, WatchlistStore};

#[derive(Parser, Debug)]
#[command(name = "papertrail", about = "Paper-trading ledger and opportunity scanner")]
pub struct Cli {
    /// INI configuration file
    #[arg(short, long, global = true, default_value = "papertrail.ini")]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a new paper account
    OpenAccount {
        account: String,
        /// Starting cash; defaults to [ledger] initial_balance
        #[arg(long)]
        balance: Option<Decimal>,
    },
    /// Buy at a given price
    Buy {
        account: String,
        symbol: String,
        quantity: Decimal,
        price: Decimal,
    },
    /// Sell at a given price
    Sell {
        account: String,
        symbol: String,
        quantity: Decimal,
        price: Decimal,
    },
    /// Show cash and open positions
    Portfolio { account: String },
    /// Show the transaction log, oldest first
    Transactions {
        account: String,
        /// Only the most recent N
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show realized and unrealized P&L per tracked buy
    Performance { account: String },
    /// Mark positions to the latest feed prices
    Valuation { account: String },
    /// Check balances and positions against the transaction log
    Reconcile { account: String },
    /// Score symbols for dip-buying opportunities
    Scan {
        /// Comma-separated symbols; defaults to [scan] symbols
        #[arg(long)]
        symbols: Option<String>,
        #[arg(long, default_value_t = 0.0)]
        min_score: f64,
        #[arg(long)]
        category: Option<Category>,
        /// Add every scored result to this user's watchlist
        #[arg(long)]
        watch: Option<String>,
    },
    /// Manage per-user watchlists
    Watchlist {
        #[command(subcommand)]
        action: WatchlistAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum WatchlistAction {
    Add { user: String, symbol: String },
    Remove { user: String, symbol: String },
    List { user: String },
}

pub fn run(cli: Cli) -> ExitCode {
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn execute(cli: Cli) -> Result<(), PapertrailError> {
    let config = FileConfigAdapter::from_file(&cli.config)?;

    match cli.command {
        Command::OpenAccount { account, balance } => run_open_account(&config, &account, balance),
        Command::Buy {
            account,
            symbol,
            quantity,
            price,
        } => {
            let ledger = open_ledger(&config)?;
            let tx = ledger.buy(&account, &symbol, quantity, price)?;
            println!(
                "#{} BUY {} {} @ {} = {} (cash {})",
                tx.seq,
                tx.quantity,
                tx.symbol,
                tx.price,
                money(tx.amount),
                money(tx.resulting_balance)
            );
            Ok(())
        }
        Command::Sell {
            account,
            symbol,
            quantity,
            price,
        } => {
            let ledger = open_ledger(&config)?;
            let tx = ledger.sell(&account, &symbol, quantity, price)?;
            println!(
                "#{} SELL {} {} @ {} = {} (cash {})",
                tx.seq,
                tx.quantity,
                tx.symbol,
                tx.price,
                money(tx.amount),
                money(tx.resulting_balance)
            );
            Ok(())
        }
        Command::Portfolio { account } => run_portfolio(&config, &account),
        Command::Transactions { account, limit } => run_transactions(&config, &account, limit),
        Command::Performance { account } => run_performance(&config, &account),
        Command::Valuation { account } => run_valuation(&config, &account),
        Command::Reconcile { account } => {
            let ledger = open_ledger(&config)?;
            ledger.reconcile(&account)?;
            println!("{account}: ledger reconciles with its transaction log");
            Ok(())
        }
        Command::Scan {
            symbols,
            min_score,
            category,
            watch,
        } => run_scan(&config, symbols.as_deref(), min_score, category, watch.as_deref()),
        Command::Watchlist { action } => run_watchlist(&config, action),
    }
}

fn money(value: Decimal) -> Decimal {
    value.round_dp(2)
}

#[cfg(feature = "sqlite")]
fn open_store(config: &FileConfigAdapter) -> Result<Arc<SqliteStore>, PapertrailError> {
    Ok(Arc::new(SqliteStore::from_config(config)?))
}

#[cfg(not(feature = "sqlite"))]
fn open_store(_config: &FileConfigAdapter) -> Result<Arc<MemoryStore>, PapertrailError> {
    Err(PapertrailError::Database {
        reason: "sqlite feature is required for a persistent ledger".into(),
    })
}

fn open_ledger(config: &FileConfigAdapter) -> Result<Ledger, PapertrailError> {
    let ledger_config = load_ledger_config(config)?;
    let store: Arc<dyn LedgerStore> = open_store(config)?;
    Ledger::open(store, ledger_config)
}

fn open_watchlists(config: &FileConfigAdapter) -> Result<WatchlistManager, PapertrailError> {
    let store: Arc<dyn WatchlistStore> = open_store(config)?;
    WatchlistManager::open(store)
}

fn run_open_account(
    config: &FileConfigAdapter,
    account: &str,
    balance: Option<Decimal>,
) -> Result<(), PapertrailError> {
    let ledger = open_ledger(config)?;
    let balance = balance.unwrap_or(ledger.config().default_initial_balance);
    let snapshot = ledger.open_account(account, balance)?;
    println!(
        "opened {} with {}",
        snapshot.account_id,
        money(snapshot.cash_balance)
    );
    Ok(())
}

fn run_portfolio(config: &FileConfigAdapter, account: &str) -> Result<(), PapertrailError> {
    let ledger = open_ledger(config)?;
    let snap = ledger.get_portfolio(account)?;

    println!("Account:   {}", snap.account_id);
    println!("Initial:   {}", money(snap.initial_balance));
    println!("Cash:      {}", money(snap.cash_balance));
    println!("Trades:    {}", snap.transaction_count);
    if snap.positions.is_empty() {
        println!("No open positions.");
        return Ok(());
    }
    println!();
    println!(
        "{:<12} {:>14} {:>14} {:>16}  Opened",
        "Symbol", "Quantity", "Avg cost", "Cost basis"
    );
    for pos in &snap.positions {
        println!(
            "{:<12} {:>14} {:>14} {:>16}  {}",
            pos.symbol,
            pos.quantity,
            money(pos.avg_cost),
            money(pos.cost_basis),
            pos.opened_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn run_transactions(
    config: &FileConfigAdapter,
    account: &str,
    limit: Option<usize>,
) -> Result<(), PapertrailError> {
    let ledger = open_ledger(config)?;
    let txs = ledger.get_transactions(account, limit)?;
    if txs.is_empty() {
        println!("No transactions.");
        return Ok(());
    }
    println!(
        "{:>5}  {:<17} {:<4} {:<12} {:>12} {:>12} {:>14} {:>14}",
        "#", "Time", "Side", "Symbol", "Quantity", "Price", "Amount", "Balance"
    );
    for tx in &txs {
        println!(
            "{:>5}  {:<17} {:<4} {:<12} {:>12} {:>12} {:>14} {:>14}",
            tx.seq,
            tx.timestamp.format("%Y-%m-%d %H:%M"),
            tx.side,
            tx.symbol,
            tx.quantity,
            tx.price,
            money(tx.amount),
            money(tx.resulting_balance)
        );
    }
    Ok(())
}

fn run_performance(config: &FileConfigAdapter, account: &str) -> Result<(), PapertrailError> {
    let ledger = open_ledger(config)?;
    let feed = CsvFeed::from_config(config)?;
    let summary = ledger.get_performance_summary(account, &feed)?;

    if summary.entries.is_empty() {
        println!("No tracked purchases.");
        return Ok(());
    }
    println!(
        "{:<12} {:<7} {:<11} {:>14} {:>12} {:>9} {:>12}  Closed",
        "Symbol", "Status", "Opened", "Invested", "Realized", "Real %", "Unrealized"
    );
    for e in &summary.entries {
        let unrealized = e
            .unrealized_pnl
            .map(|u| money(u).to_string())
            .unwrap_or_else(|| "-".into());
        let closed = match (e.closed_at, e.close_reason) {
            (Some(at), Some(reason)) => format!("{} {}", at.format("%Y-%m-%d"), reason),
            _ => String::new(),
        };
        println!(
            "{:<12} {:<7} {:<11} {:>14} {:>12} {:>8}% {:>12}  {}",
            e.symbol,
            e.status,
            e.opened_at.format("%Y-%m-%d"),
            money(e.initial_investment),
            money(e.realized_pnl),
            money(e.realized_pnl_percent),
            unrealized,
            closed
        );
    }
    println!();
    println!("Total realized:   {}", money(summary.total_realized));
    println!("Total unrealized: {}", money(summary.total_unrealized));
    Ok(())
}

fn run_valuation(config: &FileConfigAdapter, account: &str) -> Result<(), PapertrailError> {
    let ledger = open_ledger(config)?;
    let feed = CsvFeed::from_config(config)?;
    let val = ledger.valuation(account, &feed)?;

    println!("Account: {}", val.account_id);
    println!("Cash:    {}", money(val.cash_balance));
    for p in &val.positions {
        match (p.price, p.market_value, p.unrealized_pnl) {
            (Some(price), Some(value), Some(pnl)) => println!(
                "  {:<12} {:>12} x {:>12} = {:>14}  P&L {:>12}",
                p.symbol,
                p.quantity,
                price,
                money(value),
                money(pnl)
            ),
            _ => println!(
                "  {:<12} {:>12}   (no quote, valued at cost {})",
                p.symbol,
                p.quantity,
                money(p.cost_basis)
            ),
        }
    }
    println!("Equity:  {}", money(val.total_equity));
    if !val.unpriced.is_empty() {
        eprintln!("warning: no quote for {}", val.unpriced.join(", "));
    }
    Ok(())
}

fn run_scan(
    config: &FileConfigAdapter,
    symbols: Option<&str>,
    min_score: f64,
    category: Option<Category>,
    watch: Option<&str>,
) -> Result<(), PapertrailError> {
    let symbols = match symbols {
        Some(list) => parse_symbols(list)?,
        None => configured_symbols(config)?,
    };
    if symbols.is_empty() {
        return Err(PapertrailError::invalid_input(
            "no symbols to scan: pass --symbols or set [scan] symbols",
        ));
    }

    let scan_config = load_scan_config(config)?;
    let scoring = load_scoring_config(config)?;
    let params = load_indicator_params(config)?;
    check_scan_covers_scoring(&scan_config, &scoring)?;

    let feed = CsvFeed::from_config(config)?;
    let scanner = Scanner::new(&feed, scan_config, params, scoring);
    let report = scanner.score_opportunities(&symbols, min_score, category, &CancelToken::new())?;

    if report.signals.is_empty() {
        println!("No opportunities at or above {min_score}.");
    } else {
        println!(
            "{:>4}  {:<12} {:<10} {:>6}  {:<17} Factors",
            "Rank", "Symbol", "Category", "Score", "Recommendation"
        );
        for (i, s) in report.signals.iter().enumerate() {
            println!(
                "{:>4}  {:<12} {:<10} {:>6.1}  {:<17} {}",
                i + 1,
                s.symbol,
                s.category,
                s.score,
                s.recommendation,
                s.contributing_factors.join("; ")
            );
        }
    }
    for skipped in &report.skipped {
        eprintln!(
            "skipped {} after {} attempt(s): {}",
            skipped.symbol, skipped.attempts, skipped.reason
        );
    }

    if let Some(user) = watch {
        let scored: Vec<_> = report
            .signals
            .iter()
            .filter(|s| s.is_scored())
            .cloned()
            .collect();
        let list = open_watchlists(config)?.add_from_signals(user, &scored)?;
        println!("{user} watchlist: {}", list.join(", "));
    }
    Ok(())
}

fn run_watchlist(config: &FileConfigAdapter, action: WatchlistAction) -> Result<(), PapertrailError> {
    let manager = open_watchlists(config)?;
    let (user, list) = match action {
        WatchlistAction::Add { user, symbol } => {
            let list = manager.add(&user, &symbol)?;
            (user, list)
        }
        WatchlistAction::Remove { user, symbol } => {
            let list = manager.remove(&user, &symbol)?;
            (user, list)
        }
        WatchlistAction::List { user } => {
            let list = manager.list(&user)?;
            (user, list)
        }
    };
    if list.is_empty() {
        println!("{user}: watchlist is empty");
    } else {
        println!("{user}: {}", list.join(", "));
    }
    Ok(())
}
