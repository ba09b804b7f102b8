//! Port traits the domain depends on; adapters implement them.

pub mod config_port;
pub mod ledger_store_port;
pub mod market_data_port;
