//! Domain error types.

use rust_decimal::Decimal;

/// Top-level error type for papertrail.
#[derive(Debug, thiserror::Error)]
pub enum PapertrailError {
    #[error("insufficient funds: required {required}, available {available} (short by {})", shortfall(.required, .available))]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("insufficient quantity of {symbol}: requested {requested}, held {held} (short by {})", shortfall(.requested, .held))]
    InsufficientQuantity {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },

    #[error("no position in {symbol}")]
    NoSuchPosition { symbol: String },

    #[error("insufficient data for {symbol}: have {have} candles, need {need}")]
    InsufficientData {
        symbol: String,
        have: usize,
        need: usize,
    },

    #[error("market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("account not found: {id}")]
    AccountNotFound { id: String },

    #[error("account already exists: {id}")]
    AccountExists { id: String },

    #[error("ledger for {id} does not reconcile with its transaction log: {reason}")]
    ReconciliationMismatch { id: String, reason: String },

    #[error("account {id} was changed by another writer (expected log head {expected}, found {found}); reload and retry")]
    StaleAccount { id: String, expected: u64, found: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn shortfall(needed: &Decimal, have: &Decimal) -> Decimal {
    needed - have
}

impl PapertrailError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        PapertrailError::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn data_unavailable(symbol: &str, reason: impl Into<String>) -> Self {
        PapertrailError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&PapertrailError> for std::process::ExitCode {
    fn from(err: &PapertrailError) -> Self {
        let code: u8 = match err {
            PapertrailError::Io(_) => 1,
            PapertrailError::ConfigParse { .. }
            | PapertrailError::ConfigMissing { .. }
            | PapertrailError::ConfigInvalid { .. } => 2,
            PapertrailError::Database { .. }
            | PapertrailError::DatabaseQuery { .. }
            | PapertrailError::StaleAccount { .. }
            | PapertrailError::ReconciliationMismatch { .. } => 3,
            PapertrailError::InsufficientFunds { .. }
            | PapertrailError::InsufficientQuantity { .. }
            | PapertrailError::NoSuchPosition { .. }
            | PapertrailError::InvalidInput { .. }
            | PapertrailError::AccountNotFound { .. }
            | PapertrailError::AccountExists { .. } => 4,
            PapertrailError::InsufficientData { .. } | PapertrailError::DataUnavailable { .. } => 5,
            PapertrailError::Cancelled => 6,
        };
        std::process::ExitCode::from(code)
    }
}
