pub mod eastmoney;
pub mod file;
pub mod normalizer;

pub use eastmoney::{EastmoneyClient, StorageConfig};
pub use file::JsonFileProvider;
pub use normalizer::SeriesNormalizer;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde_json::{Map, Value};
use std::fmt;

/// One provider row: field label to raw value. Labels may be the provider's
/// own (e.g. `收盘`) or canonical English names; the normalizer maps both.
pub type RawRow = Map<String, Value>;

const DATE_FORMAT: &str = "%Y%m%d";

/// Inclusive date range rendered as 8-digit `YYYYMMDD` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(anyhow!("start {} is after end {}", start, end));
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYYMMDD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = NaiveDate::parse_from_str(start, DATE_FORMAT)
            .map_err(|e| anyhow!("invalid start date {:?}: {}", start, e))?;
        let end = NaiveDate::parse_from_str(end, DATE_FORMAT)
            .map_err(|e| anyhow!("invalid end date {:?}: {}", end, e))?;
        Self::new(start, end)
    }

    /// The `days` calendar days ending on `end`.
    pub fn trailing(end: NaiveDate, days: i64) -> Self {
        Self {
            start: end - Duration::days(days.max(0)),
            end,
        }
    }

    pub fn start_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_str(), self.end_str())
    }
}

/// Source of daily quote and money-flow rows. Adapters do no retrying.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_quotes(&self, ticker: &str, range: &DateRange) -> Result<Vec<RawRow>>;
    async fn fetch_money_flow(&self, ticker: &str) -> Result<Vec<RawRow>>;
}

/// Accepts `2024-01-31`, `20240131` and `2024-01-31 00:00:00`.
pub fn parse_row_date(value: &Value) -> Option<NaiveDate> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let head = text.split_whitespace().next().unwrap_or("");
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, DATE_FORMAT))
        .ok()
}
