use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DateRange, MarketDataProvider, RawRow};

const KLINE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";
const MONEY_FLOW_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/fflow/daykline/get";

/// Column order of a kline record.
const KLINE_FIELDS: [&str; 11] = [
    "日期", "开盘", "收盘", "最高", "最低", "成交量", "成交额", "振幅", "涨跌幅", "涨跌额", "换手率",
];

/// Adapter connection and on-disk cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Responses are cached here as JSON when set.
    pub cache_dir: Option<PathBuf>,
    pub max_connections: usize,
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_connections: 8,
            timeout_secs: 15,
        }
    }
}

/// Money flow is fetched as a full history, so its cache entry is only valid
/// for the day it was fetched.
fn money_flow_cache_key(ticker: &str, as_of: NaiveDate) -> String {
    format!("flow_{}_{}", ticker, as_of.format("%Y%m%d"))
}

#[derive(Debug, Deserialize)]
struct KlineEnvelope {
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

/// Market prefix for a 6-digit A-share code: Shanghai codes start with 6.
pub fn secid(ticker: &str) -> String {
    let market = if ticker.starts_with('6') { 1 } else { 0 };
    format!("{}.{}", market, ticker)
}

fn split_record(record: &str) -> Vec<Value> {
    record
        .split(',')
        .map(|cell| Value::String(cell.trim().to_string()))
        .collect()
}

/// Parse kline records (`date,open,close,high,low,...`) into labelled rows.
pub fn parse_klines(records: &[String]) -> Vec<RawRow> {
    records
        .iter()
        .map(|record| {
            KLINE_FIELDS
                .iter()
                .zip(split_record(record))
                .map(|(label, value)| (label.to_string(), value))
                .collect()
        })
        .collect()
}

/// Parse money-flow records. Main net inflow is the second cell and its
/// share of turnover the seventh.
pub fn parse_money_flow(records: &[String]) -> Vec<RawRow> {
    records
        .iter()
        .filter_map(|record| {
            let cells = split_record(record);
            if cells.len() < 7 {
                debug!("Skipping short money-flow record: {}", record);
                return None;
            }
            let mut row = RawRow::new();
            row.insert("日期".into(), cells[0].clone());
            row.insert("主力净流入".into(), cells[1].clone());
            row.insert("主力净流入占比".into(), cells[6].clone());
            Some(row)
        })
        .collect()
}

/// HTTP adapter for the public Eastmoney history endpoints.
#[derive(Debug, Clone)]
pub struct EastmoneyClient {
    client: Client,
    cache_dir: Option<PathBuf>,
}

impl EastmoneyClient {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.max_connections)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            cache_dir: config.cache_dir.clone(),
        })
    }

    fn cache_path(&self, name: &str) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(format!("{}.json", name)))
    }

    async fn read_cache(path: &Path) -> Option<Vec<RawRow>> {
        let bytes = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!("Ignoring unreadable cache file {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn write_cache(path: &Path, rows: &[RawRow]) {
        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, serde_json::to_vec(rows)?).await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to write cache file {}: {}", path.display(), e);
        }
    }

    async fn get_records(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<String>> {
        let resp = self.client.get(url).query(query).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("{} returned HTTP {}", url, resp.status()));
        }
        let envelope: KlineEnvelope = resp.json().await?;
        Ok(envelope.data.map(|d| d.klines).unwrap_or_default())
    }

    async fn cached<F, Fut>(&self, name: String, fetch: F) -> Result<Vec<RawRow>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<RawRow>>>,
    {
        let path = self.cache_path(&name);
        if let Some(path) = &path {
            if let Some(rows) = Self::read_cache(path).await {
                debug!("Cache hit for {}", name);
                return Ok(rows);
            }
        }

        let rows = fetch().await?;
        if let Some(path) = &path {
            if !rows.is_empty() {
                Self::write_cache(path, &rows).await;
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl MarketDataProvider for EastmoneyClient {
    async fn fetch_quotes(&self, ticker: &str, range: &DateRange) -> Result<Vec<RawRow>> {
        let name = format!("quotes_{}_{}", ticker, range);
        self.cached(name, move || async move {
            info!("Fetching daily quotes for {} ({})", ticker, range);
            let query = [
                ("secid", secid(ticker)),
                ("fields1", "f1,f2,f3,f4,f5,f6".to_string()),
                ("fields2", "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61".to_string()),
                ("klt", "101".to_string()),
                ("fqt", "1".to_string()),
                ("beg", range.start_str()),
                ("end", range.end_str()),
            ];
            let records = self.get_records(KLINE_URL, &query).await?;
            Ok(parse_klines(&records))
        })
        .await
    }

    async fn fetch_money_flow(&self, ticker: &str) -> Result<Vec<RawRow>> {
        let name = money_flow_cache_key(ticker, Local::now().date_naive());
        self.cached(name, move || async move {
            debug!("Fetching money flow for {}", ticker);
            let query = [
                ("secid", secid(ticker)),
                ("lmt", "0".to_string()),
                ("klt", "101".to_string()),
                ("fields1", "f1,f2,f3,f7".to_string()),
                ("fields2", "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61,f62,f63,f64,f65".to_string()),
            ];
            let records = self.get_records(MONEY_FLOW_URL, &query).await?;
            Ok(parse_money_flow(&records))
        })
        .await
    }
}
