//! Core domain types and logic.

pub mod candle;
pub mod category;
pub mod indicator;
pub mod scoring;
pub mod scanner;
pub mod position;
pub mod transaction;
pub mod performance;
pub mod account;
pub mod ledger;
pub mod watchlist;
pub mod config_validation;
pub mod error;
