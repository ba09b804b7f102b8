//! Static symbol → category classification.
//!
//! Used only to filter scan results; a symbol's category never feeds into
//! its score.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Crypto,
    Forex,
    Index,
    Commodity,
    Equity,
}

const CRYPTO_QUOTES: [&str; 4] = ["-USD", "-USDT", "-EUR", "-BTC"];

pub fn classify(symbol: &str) -> Category {
    let s = symbol.trim().to_uppercase();
    if s.starts_with('^') {
        Category::Index
    } else if s.ends_with("=X") {
        Category::Forex
    } else if s.ends_with("=F") {
        Category::Commodity
    } else if CRYPTO_QUOTES.iter().any(|q| s.ends_with(q)) || s.ends_with("USDT") {
        Category::Crypto
    } else {
        Category::Equity
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::Crypto => "crypto",
            Category::Forex => "forex",
            Category::Index => "index",
            Category::Commodity => "commodity",
            Category::Equity => "equity",
        };
        f.write_str(label)
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "crypto" => Ok(Category::Crypto),
            "forex" | "fx" => Ok(Category::Forex),
            "index" => Ok(Category::Index),
            "commodity" | "futures" => Ok(Category::Commodity),
            "equity" | "stock" => Ok(Category::Equity),
            other => Err(format!("unknown category: {other}")),
        }
    }
}
