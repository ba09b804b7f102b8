//! End-to-end tests across the ledger, scanner, stores and watchlists.

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::*;
use papertrail::adapters::fixture_feed::FixtureFeed;
use papertrail::adapters::memory_store::MemoryStore;
use papertrail::domain::account::Account;
use papertrail::domain::error::PapertrailError;
use papertrail::domain::indicator::IndicatorParams;
use papertrail::domain::ledger::{Ledger, LedgerConfig};
use papertrail::domain::performance::{CloseReason, RecordStatus};
use papertrail::domain::scanner::{CancelToken, RetryPolicy, ScanConfig, Scanner};
use papertrail::domain::scoring::{Recommendation, ScoringConfig};
use papertrail::domain::transaction::Side;
use papertrail::domain::watchlist::WatchlistManager;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap()
}

fn memory_ledger() -> Ledger {
    let ledger = Ledger::open(Arc::new(MemoryStore::new()), LedgerConfig::default()).unwrap();
    ledger.open_account("alice", dec!(100000)).unwrap();
    ledger
}

mod ledger_scenario {
    use super::*;

    #[test]
    fn buy_buy_sell_realizes_against_average_cost() {
        let ledger = memory_ledger();

        ledger.buy_at("alice", "aapl", dec!(100), dec!(50), t0()).unwrap();
        let second = ledger
            .buy_at("alice", "AAPL", dec!(50), dec!(60), t0() + Duration::hours(1))
            .unwrap();
        assert_eq!(second.resulting_balance, dec!(92000));

        let snap = ledger.get_portfolio("alice").unwrap();
        let pos = &snap.positions[0];
        assert_eq!(pos.quantity, dec!(150));
        assert_eq!(pos.cost_basis, dec!(8000));
        assert_eq!(pos.avg_cost.round_dp(2), dec!(53.33));

        let sell = ledger
            .sell_at("alice", "AAPL", dec!(150), dec!(55), t0() + Duration::hours(2))
            .unwrap();
        assert_eq!(sell.side, Side::Sell);
        assert_eq!(sell.amount, dec!(8250));
        assert_eq!(sell.resulting_balance, dec!(100250));

        let snap = ledger.get_portfolio("alice").unwrap();
        assert!(snap.positions.is_empty());
        assert_eq!(snap.cash_balance, dec!(100250));
        assert_eq!(snap.transaction_count, 3);

        let summary = ledger
            .performance_summary_at("alice", &HashMap::new(), t0() + Duration::hours(3))
            .unwrap();
        assert_eq!(summary.entries.len(), 1);
        let entry = &summary.entries[0];
        assert_eq!(entry.status, RecordStatus::Closed);
        assert_eq!(entry.close_reason, Some(CloseReason::Liquidated));
        assert_eq!(entry.initial_investment, dec!(8000));
        assert_eq!(entry.realized_pnl, dec!(250));
        assert_eq!(summary.total_realized, dec!(250));

        ledger.reconcile("alice").unwrap();
    }

    #[test]
    fn rejected_orders_leave_no_trace() {
        let ledger = memory_ledger();
        ledger.buy_at("alice", "MSFT", dec!(10), dec!(400), t0()).unwrap();
        let before = ledger.get_portfolio("alice").unwrap();

        assert!(matches!(
            ledger.buy_at("alice", "MSFT", dec!(1000), dec!(400), t0()),
            Err(PapertrailError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            ledger.sell_at("alice", "MSFT", dec!(11), dec!(400), t0()),
            Err(PapertrailError::InsufficientQuantity { .. })
        ));
        assert!(matches!(
            ledger.sell_at("alice", "TSLA", dec!(1), dec!(200), t0()),
            Err(PapertrailError::NoSuchPosition { .. })
        ));
        assert!(matches!(
            ledger.buy_at("alice", "MSFT", dec!(0), dec!(400), t0()),
            Err(PapertrailError::InvalidInput { .. })
        ));

        assert_eq!(ledger.get_portfolio("alice").unwrap(), before);
        assert_eq!(ledger.get_transactions("alice", None).unwrap().len(), 1);
    }

    #[test]
    fn transactions_limit_returns_most_recent() {
        let ledger = memory_ledger();
        for i in 0..5 {
            ledger
                .buy_at("alice", "AAPL", dec!(1), dec!(100), t0() + Duration::minutes(i))
                .unwrap();
        }
        let recent = ledger.get_transactions("alice", Some(2)).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].seq, 4);
        assert_eq!(recent[1].seq, 5);
    }

    #[test]
    fn valuation_marks_quoted_positions_and_keeps_unpriced_at_cost() {
        let ledger = memory_ledger();
        ledger.buy_at("alice", "AAPL", dec!(10), dec!(100), t0()).unwrap();
        ledger.buy_at("alice", "BTC-USD", dec!(0.5), dec!(40000), t0()).unwrap();

        let feed = FixtureFeed::new().with_quote("AAPL", dec!(110));
        let val = ledger.valuation("alice", &feed).unwrap();

        assert_eq!(val.cash_balance, dec!(79000));
        assert_eq!(val.unpriced, vec!["BTC-USD".to_string()]);
        // 79000 + 10 * 110 + 20000 at cost
        assert_eq!(val.total_equity, dec!(100100));
        let aapl = val.positions.iter().find(|p| p.symbol == "AAPL").unwrap();
        assert_eq!(aapl.unrealized_pnl, Some(dec!(100)));
    }
}

mod expiry {
    use super::*;

    #[test]
    fn record_expires_strictly_after_tracking_window() {
        let ledger = memory_ledger();
        ledger.buy_at("alice", "ETH-USD", dec!(2), dec!(3000), t0()).unwrap();
        let quotes = HashMap::from([("ETH-USD".to_string(), dec!(3300))]);

        let at_boundary = ledger
            .performance_summary_at("alice", &quotes, t0() + Duration::days(7))
            .unwrap();
        assert_eq!(at_boundary.entries[0].status, RecordStatus::Active);
        assert_eq!(at_boundary.total_unrealized, dec!(600));

        let after = ledger
            .performance_summary_at("alice", &quotes, t0() + Duration::days(7) + Duration::seconds(1))
            .unwrap();
        let entry = &after.entries[0];
        assert_eq!(entry.status, RecordStatus::Closed);
        assert_eq!(entry.close_reason, Some(CloseReason::Expired));
        assert_eq!(entry.closed_at, Some(t0() + Duration::days(7) + Duration::seconds(1)));

        // The position itself is untouched by expiry.
        let snap = ledger.get_portfolio("alice").unwrap();
        assert_eq!(snap.positions[0].quantity, dec!(2));
    }

    #[test]
    fn buying_after_expiry_starts_a_new_record() {
        let ledger = memory_ledger();
        ledger.buy_at("alice", "ETH-USD", dec!(1), dec!(3000), t0()).unwrap();
        ledger.expire_at("alice", t0() + Duration::days(8)).unwrap();
        ledger
            .buy_at("alice", "ETH-USD", dec!(1), dec!(2500), t0() + Duration::days(9))
            .unwrap();

        let summary = ledger
            .performance_summary_at("alice", &HashMap::new(), t0() + Duration::days(9))
            .unwrap();
        assert_eq!(summary.entries.len(), 2);
        let active: Vec<_> = summary
            .entries
            .iter()
            .filter(|e| e.status == RecordStatus::Active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].initial_investment, dec!(2500));
    }
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    const SYMBOLS: [&str; 3] = ["AAPL", "BTC-USD", "GC=F"];

    #[derive(Debug, Clone)]
    struct Order {
        buy: bool,
        symbol: usize,
        quantity: u32,
        price_cents: i64,
    }

    fn order() -> impl Strategy<Value = Order> {
        (any::<bool>(), 0..SYMBOLS.len(), 1u32..40, 1i64..50_000).prop_map(
            |(buy, symbol, quantity, price_cents)| Order {
                buy,
                symbol,
                quantity,
                price_cents,
            },
        )
    }

    proptest! {
        #[test]
        fn cash_is_conserved_and_log_replays(orders in prop::collection::vec(order(), 1..40)) {
            let initial = dec!(5000);
            let mut account = Account::new("prop", initial).unwrap();

            for (i, o) in orders.iter().enumerate() {
                let at = t0() + Duration::minutes(i as i64);
                let qty = Decimal::from(o.quantity);
                let price = Decimal::new(o.price_cents, 2);
                let before = account.clone();
                let result = if o.buy {
                    account.apply_buy(SYMBOLS[o.symbol], qty, price, at)
                } else {
                    account.apply_sell(SYMBOLS[o.symbol], qty, price, at)
                };
                if result.is_err() {
                    prop_assert_eq!(&account, &before);
                }
                prop_assert!(account.cash_balance >= Decimal::ZERO);
            }

            let net: Decimal = account.transactions.iter().map(|t| t.cash_delta()).sum();
            prop_assert_eq!(account.cash_balance, initial + net);
            prop_assert!(account.positions.values().all(|p| p.quantity > Decimal::ZERO));

            let replayed = Account::replay("prop", initial, &account.transactions).unwrap();
            prop_assert_eq!(replayed.cash_balance, account.cash_balance);
            prop_assert_eq!(replayed.positions, account.positions.clone());
            prop_assert!(account.reconcile().is_ok());
        }
    }
}

mod concurrency {
    use super::*;
    use std::thread;

    #[test]
    fn two_concurrent_full_sells_only_one_wins() {
        let ledger = Arc::new(memory_ledger());
        ledger.buy_at("alice", "AAPL", dec!(10), dec!(100), t0()).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || ledger.sell("alice", "AAPL", dec!(10), dec!(105)))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(PapertrailError::NoSuchPosition { .. })
                | Err(PapertrailError::InsufficientQuantity { .. })
        )));

        let snap = ledger.get_portfolio("alice").unwrap();
        assert_eq!(snap.cash_balance, dec!(100050));
        assert_eq!(snap.transaction_count, 2);
        ledger.reconcile("alice").unwrap();
    }

    #[test]
    fn two_concurrent_partial_sells_cannot_oversell() {
        let ledger = Arc::new(memory_ledger());
        ledger.buy_at("alice", "AAPL", dec!(10), dec!(100), t0()).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || ledger.sell("alice", "AAPL", dec!(6), dec!(100)))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let rejected: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(rejected.len(), 1);
        match rejected[0] {
            PapertrailError::InsufficientQuantity {
                requested, held, ..
            } => {
                assert_eq!(*requested, dec!(6));
                assert_eq!(*held, dec!(4));
            }
            other => panic!("expected InsufficientQuantity, got {other}"),
        }

        let snap = ledger.get_portfolio("alice").unwrap();
        assert_eq!(snap.positions.len(), 1);
        assert_eq!(snap.positions[0].quantity, dec!(4));
        assert_eq!(snap.cash_balance, dec!(99600));
        ledger.reconcile("alice").unwrap();
    }

    #[test]
    fn parallel_buys_on_separate_accounts_do_not_interfere() {
        let ledger = Arc::new(memory_ledger());
        ledger.open_account("bob", dec!(100000)).unwrap();

        let handles: Vec<_> = ["alice", "bob"]
            .into_iter()
            .map(|id| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for _ in 0..50 {
                        ledger.buy(id, "AAPL", dec!(1), dec!(10)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for id in ["alice", "bob"] {
            let snap = ledger.get_portfolio(id).unwrap();
            assert_eq!(snap.cash_balance, dec!(99500));
            assert_eq!(snap.positions[0].quantity, dec!(50));
        }
    }
}

mod scan {
    use super::*;
    use std::thread;
    use std::time::Duration as StdDuration;

    fn quick_config() -> ScanConfig {
        ScanConfig {
            workers: 4,
            interval: "1d".into(),
            lookback: 90,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
                call_timeout_ms: 0,
            },
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ranks_crash_first_and_unscored_last() {
        let feed = scan_feed().with_unavailable("DOWN");
        let scanner = Scanner::new(
            &feed,
            quick_config(),
            IndicatorParams::default(),
            ScoringConfig::default(),
        );

        let report = scanner
            .score_opportunities(
                &symbols(&["AAPL", "NOHIST", "DOGE-USD", "DOWN", "MSFT"]),
                0.0,
                None,
                &CancelToken::new(),
            )
            .unwrap();

        let order: Vec<&str> = report.signals.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(order, vec!["DOGE-USD", "MSFT", "AAPL", "NOHIST"]);

        let doge = &report.signals[0];
        assert_eq!(doge.recommendation, Recommendation::StrongBuy);
        assert!(doge.score >= 70.0, "score {}", doge.score);
        assert!(!doge.contributing_factors.is_empty());

        let nohist = &report.signals[3];
        assert_eq!(nohist.recommendation, Recommendation::InsufficientData);
        assert_eq!(nohist.score, 0.0);

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].symbol, "DOWN");
        assert_eq!(report.skipped[0].attempts, 3);
        assert_eq!(feed.calls("DOWN"), 3);
    }

    #[test]
    fn min_score_and_category_filter() {
        let feed = scan_feed();
        let scanner = Scanner::new(
            &feed,
            quick_config(),
            IndicatorParams::default(),
            ScoringConfig::default(),
        );
        let all = symbols(&["AAPL", "DOGE-USD", "MSFT", "NOHIST"]);

        let strong = scanner
            .score_opportunities(&all, 70.0, None, &CancelToken::new())
            .unwrap();
        assert_eq!(strong.signals.len(), 1);
        assert_eq!(strong.signals[0].symbol, "DOGE-USD");

        let equities = scanner
            .score_opportunities(
                &all,
                0.0,
                Some(papertrail::domain::category::Category::Equity),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(equities.signals.iter().all(|s| s.symbol != "DOGE-USD"));
        // Filtered symbols are never fetched.
        assert_eq!(feed.calls("DOGE-USD"), 1);
    }

    #[test]
    fn transient_failures_are_retried() {
        let feed = scan_feed().with_transient_failures("DOGE-USD", 2);
        let scanner = Scanner::new(
            &feed,
            quick_config(),
            IndicatorParams::default(),
            ScoringConfig::default(),
        );
        let report = scanner
            .score_opportunities(&symbols(&["DOGE-USD"]), 0.0, None, &CancelToken::new())
            .unwrap();
        assert!(report.skipped.is_empty());
        assert_eq!(report.signals[0].recommendation, Recommendation::StrongBuy);
        assert_eq!(feed.calls("DOGE-USD"), 3);
    }

    #[test]
    fn slow_calls_count_as_failures() {
        let feed = scan_feed().with_delay(StdDuration::from_millis(30));
        let mut config = quick_config();
        config.retry.call_timeout_ms = 5;
        config.retry.max_attempts = 2;
        let scanner = Scanner::new(
            &feed,
            config,
            IndicatorParams::default(),
            ScoringConfig::default(),
        );
        let report = scanner
            .score_opportunities(&symbols(&["AAPL"]), 0.0, None, &CancelToken::new())
            .unwrap();
        assert!(report.signals.is_empty());
        assert_eq!(report.skipped[0].attempts, 2);
    }

    #[test]
    fn cancellation_discards_partial_results() {
        let feed = scan_feed().with_delay(StdDuration::from_millis(50));
        let mut config = quick_config();
        config.workers = 1;
        let scanner = Scanner::new(
            &feed,
            config,
            IndicatorParams::default(),
            ScoringConfig::default(),
        );
        let cancel = CancelToken::new();
        let trigger = cancel.clone();

        let result = thread::scope(|s| {
            s.spawn(move || {
                thread::sleep(StdDuration::from_millis(20));
                trigger.cancel();
            });
            scanner.score_opportunities(
                &symbols(&["AAPL", "DOGE-USD", "MSFT", "NOHIST"]),
                0.0,
                None,
                &cancel,
            )
        });

        assert!(matches!(result, Err(PapertrailError::Cancelled)));
        assert!(feed.calls("NOHIST") == 0 || feed.calls("MSFT") == 0);
    }

    #[test]
    fn already_cancelled_scan_makes_no_feed_calls() {
        let feed = scan_feed();
        let scanner = Scanner::new(
            &feed,
            quick_config(),
            IndicatorParams::default(),
            ScoringConfig::default(),
        );
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            scanner.score_opportunities(&symbols(&["AAPL", "MSFT"]), 0.0, None, &cancel),
            Err(PapertrailError::Cancelled)
        ));
        assert_eq!(feed.calls("AAPL") + feed.calls("MSFT"), 0);
    }
}

mod watchlists {
    use super::*;

    #[test]
    fn add_is_idempotent_and_remove_is_a_no_op_when_absent() {
        let manager = WatchlistManager::open(Arc::new(MemoryStore::new())).unwrap();

        assert_eq!(manager.add("u1", "btc-usd").unwrap(), vec!["BTC-USD"]);
        assert_eq!(manager.add("u1", "BTC-USD").unwrap(), vec!["BTC-USD"]);
        assert_eq!(manager.add("u1", "AAPL").unwrap(), vec!["BTC-USD", "AAPL"]);
        assert_eq!(manager.remove("u1", "MSFT").unwrap(), vec!["BTC-USD", "AAPL"]);
        assert_eq!(manager.remove("u1", "btc-usd").unwrap(), vec!["AAPL"]);
        assert!(manager.list("u2").unwrap().is_empty());
    }

    #[test]
    fn scan_results_land_on_the_watchlist_in_rank_order() {
        let feed = scan_feed();
        let scanner = Scanner::new(
            &feed,
            ScanConfig::default(),
            IndicatorParams::default(),
            ScoringConfig::default(),
        );
        let report = scanner
            .score_opportunities(
                &["AAPL".to_string(), "DOGE-USD".to_string(), "MSFT".to_string()],
                10.0,
                None,
                &CancelToken::new(),
            )
            .unwrap();

        let store = Arc::new(MemoryStore::new());
        let manager = WatchlistManager::open(store.clone()).unwrap();
        manager.add("u1", "MSFT").unwrap();
        let list = manager.add_from_signals("u1", &report.signals).unwrap();
        assert_eq!(list, vec!["MSFT", "DOGE-USD"]);

        let reopened = WatchlistManager::open(store).unwrap();
        assert_eq!(reopened.list("u1").unwrap(), list);
    }
}

#[cfg(feature = "sqlite")]
mod sqlite_persistence {
    use super::*;
    use papertrail::adapters::file_config_adapter::FileConfigAdapter;
    use papertrail::adapters::sqlite_adapter::SqliteStore;
    use tempfile::TempDir;

    fn file_store(dir: &TempDir) -> Arc<SqliteStore> {
        let ini = format!(
            "[sqlite]\npath = {}\npool_size = 2\n",
            dir.path().join("ledger.db").display()
        );
        let config = FileConfigAdapter::from_string(&ini).unwrap();
        Arc::new(SqliteStore::from_config(&config).unwrap())
    }

    #[test]
    fn second_instance_cannot_clobber_another_writers_trade() {
        let dir = TempDir::new().unwrap();
        let first = Ledger::open(file_store(&dir), LedgerConfig::default()).unwrap();
        first.open_account("alice", dec!(100000)).unwrap();
        first.buy_at("alice", "AAPL", dec!(10), dec!(100), t0()).unwrap();

        let second = Ledger::open(file_store(&dir), LedgerConfig::default()).unwrap();
        second
            .buy_at("alice", "AAPL", dec!(5), dec!(110), t0() + Duration::hours(1))
            .unwrap();

        // The first instance still holds a one-entry log; its expiry commit
        // must not overwrite the second instance's trade.
        let later = t0() + Duration::days(30);
        assert!(matches!(
            first.performance_summary_at("alice", &HashMap::new(), later),
            Err(PapertrailError::StaleAccount { .. })
        ));
        let summary = first
            .performance_summary_at("alice", &HashMap::new(), later)
            .unwrap();
        assert_eq!(summary.entries[0].status, RecordStatus::Closed);

        let reopened = Ledger::open(file_store(&dir), LedgerConfig::default()).unwrap();
        let snap = reopened.get_portfolio("alice").unwrap();
        assert_eq!(snap.transaction_count, 2);
        assert_eq!(snap.cash_balance, dec!(100000) - dec!(1000) - dec!(550));
        assert_eq!(snap.positions[0].quantity, dec!(15));
        reopened.reconcile("alice").unwrap();
    }

    #[test]
    fn ledger_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let ledger = Ledger::open(file_store(&dir), LedgerConfig::default()).unwrap();
            ledger.open_account("alice", dec!(100000)).unwrap();
            ledger.buy_at("alice", "AAPL", dec!(100), dec!(50), t0()).unwrap();
            ledger
                .buy_at("alice", "AAPL", dec!(50), dec!(60), t0() + Duration::hours(1))
                .unwrap();
            ledger
                .sell_at("alice", "AAPL", dec!(60), dec!(55), t0() + Duration::hours(2))
                .unwrap();
            ledger.buy_at("alice", "ETH-USD", dec!(0.25), dec!(3200.10), t0()).unwrap();
        }

        let ledger = Ledger::open(file_store(&dir), LedgerConfig::default()).unwrap();
        assert_eq!(ledger.account_ids(), vec!["alice".to_string()]);
        let snap = ledger.get_portfolio("alice").unwrap();
        assert_eq!(snap.transaction_count, 4);
        assert_eq!(snap.cash_balance, dec!(100000) - dec!(5000) - dec!(3000) + dec!(3300) - dec!(800.025));

        let aapl = snap.positions.iter().find(|p| p.symbol == "AAPL").unwrap();
        assert_eq!(aapl.quantity, dec!(90));
        ledger.reconcile("alice").unwrap();

        let txs = ledger.get_transactions("alice", None).unwrap();
        assert_eq!(txs.iter().map(|t| t.seq).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(txs[3].quantity, dec!(0.25));
    }

    #[test]
    fn watchlists_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let manager = WatchlistManager::open(file_store(&dir)).unwrap();
            manager.add("u1", "^GSPC").unwrap();
            manager.add("u1", "EURUSD=X").unwrap();
        }
        let manager = WatchlistManager::open(file_store(&dir)).unwrap();
        assert_eq!(manager.list("u1").unwrap(), vec!["^GSPC", "EURUSD=X"]);
    }
}
