//! CSV directory market-data feed.
//!
//! One file per symbol, `{base}/{interval}/{SYMBOL}.csv` when that interval
//! directory exists, otherwise `{base}/{SYMBOL}.csv`. Latest prices come from
//! `{base}/{SYMBOL}.csv` when present, else from the quote interval's
//! directory (`[feed] quote_interval`, then `[scan] interval`, then `1d`).
//! Columns:
//! `timestamp,open,high,low,close,volume`, where the timestamp is RFC 3339
//! or a plain `YYYY-MM-DD` date.

use crate::domain::candle::Candle;
use crate::domain::error::PapertrailError;
use crate::ports::config_port::ConfigPort;
use crate::ports::market_data_port::MarketDataFeed;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_QUOTE_INTERVAL: &str = "1d";

pub struct CsvFeed {
    base_path: PathBuf,
    quote_interval: String,
}

struct CsvRow {
    candle: Candle,
    close_text: String,
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

impl CsvFeed {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            quote_interval: DEFAULT_QUOTE_INTERVAL.to_string(),
        }
    }

    pub fn with_quote_interval(mut self, interval: &str) -> Self {
        self.quote_interval = interval.trim().to_string();
        self
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PapertrailError> {
        let dir = config.require_string("feed", "csv_dir")?;
        let interval = config
            .require_string("feed", "quote_interval")
            .or_else(|_| config.require_string("scan", "interval"))
            .unwrap_or_else(|_| DEFAULT_QUOTE_INTERVAL.to_string());
        Ok(Self::new(PathBuf::from(dir)).with_quote_interval(&interval))
    }

    fn file_name(symbol: &str) -> String {
        format!("{}.csv", symbol.trim().to_uppercase())
    }

    fn csv_path(&self, symbol: &str, interval: &str) -> PathBuf {
        let by_interval = self.base_path.join(interval);
        let dir = if !interval.is_empty() && by_interval.is_dir() {
            by_interval
        } else {
            self.base_path.clone()
        };
        dir.join(Self::file_name(symbol))
    }

    fn quote_path(&self, symbol: &str) -> PathBuf {
        let flat = self.base_path.join(Self::file_name(symbol));
        if flat.is_file() {
            flat
        } else {
            self.csv_path(symbol, &self.quote_interval)
        }
    }

    fn load(&self, symbol: &str, path: &Path) -> Result<Vec<CsvRow>, PapertrailError> {
        let content = fs::read_to_string(path).map_err(|e| {
            PapertrailError::data_unavailable(
                symbol,
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;

        let key = symbol.trim().to_uppercase();
        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut rows = Vec::new();

        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| {
                PapertrailError::data_unavailable(symbol, format!("CSV parse error: {}", e))
            })?;
            let bad = |what: &str| {
                PapertrailError::data_unavailable(
                    symbol,
                    format!("row {}: invalid or missing {}", line + 1, what),
                )
            };
            let number = |idx: usize, what: &str| -> Result<f64, PapertrailError> {
                record
                    .get(idx)
                    .and_then(|v| v.trim().parse::<f64>().ok())
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| bad(what))
            };

            let timestamp = record
                .get(0)
                .and_then(|v| parse_timestamp(v.trim()))
                .ok_or_else(|| bad("timestamp"))?;
            let close_text = record.get(4).ok_or_else(|| bad("close"))?.trim().to_string();

            rows.push(CsvRow {
                candle: Candle {
                    symbol: key.clone(),
                    timestamp,
                    open: number(1, "open")?,
                    high: number(2, "high")?,
                    low: number(3, "low")?,
                    close: number(4, "close")?,
                    volume: number(5, "volume")?,
                },
                close_text,
            });
        }

        rows.sort_by_key(|r| r.candle.timestamp);
        Ok(rows)
    }
}

impl MarketDataFeed for CsvFeed {
    fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        lookback: usize,
    ) -> Result<Vec<Candle>, PapertrailError> {
        let rows = self.load(symbol, &self.csv_path(symbol, interval))?;
        let start = rows.len().saturating_sub(lookback);
        Ok(rows.into_iter().skip(start).map(|r| r.candle).collect())
    }

    fn get_latest_price(&self, symbol: &str) -> Result<Decimal, PapertrailError> {
        let rows = self.load(symbol, &self.quote_path(symbol))?;
        let last = rows
            .last()
            .ok_or_else(|| PapertrailError::data_unavailable(symbol, "no rows"))?;
        Decimal::from_str(&last.close_text).map_err(|e| {
            PapertrailError::data_unavailable(symbol, format!("invalid close price: {}", e))
        })
    }
}
