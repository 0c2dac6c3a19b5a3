use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{parse_row_date, DateRange, MarketDataProvider, RawRow};

#[derive(Debug, Default, Deserialize)]
struct TickerFile {
    #[serde(default)]
    quotes: Vec<RawRow>,
    #[serde(default)]
    money_flow: Vec<RawRow>,
}

/// Offline provider reading `{dir}/{ticker}.json` with `quotes` and
/// `money_flow` arrays.
#[derive(Debug, Clone)]
pub struct JsonFileProvider {
    dir: PathBuf,
}

impl JsonFileProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read(&self, ticker: &str) -> Result<TickerFile> {
        let path = self.dir.join(format!("{}.json", ticker));
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("malformed data file {}", path.display()))
    }
}

fn row_in_range(row: &RawRow, range: &DateRange) -> bool {
    ["日期", "date", "Date"]
        .iter()
        .find_map(|label| row.get(*label))
        .and_then(parse_row_date)
        .map_or(true, |date| range.contains(date))
}

#[async_trait]
impl MarketDataProvider for JsonFileProvider {
    async fn fetch_quotes(&self, ticker: &str, range: &DateRange) -> Result<Vec<RawRow>> {
        let file = self.read(ticker).await?;
        let total = file.quotes.len();
        // Undated rows pass through so the normalizer can reject them.
        let rows: Vec<RawRow> = file.quotes.into_iter().filter(|row| row_in_range(row, range)).collect();
        debug!("{}: {} of {} quote rows within {}", ticker, rows.len(), total, range);
        Ok(rows)
    }

    async fn fetch_money_flow(&self, ticker: &str) -> Result<Vec<RawRow>> {
        Ok(self.read(ticker).await?.money_flow)
    }
}
