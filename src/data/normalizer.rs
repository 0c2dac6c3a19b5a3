use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{parse_row_date, DateRange, MarketDataProvider, RawRow};
use crate::error::PipelineError;
use crate::indicators::{macd_series, rsi_series, sma_series};
use crate::types::{DailyBar, TimeSeries};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Field {
    Date,
    Open,
    Close,
    High,
    Low,
    Volume,
    Amount,
    Amplitude,
    PriceChangeRate,
    PriceChangeAmount,
    TurnoverRate,
    MainNetInflow,
    MainNetInflowRatio,
}

/// Provider labels accepted for each canonical field.
const ALIASES: &[(&str, Field)] = &[
    ("日期", Field::Date),
    ("date", Field::Date),
    ("开盘", Field::Open),
    ("open", Field::Open),
    ("收盘", Field::Close),
    ("close", Field::Close),
    ("最高", Field::High),
    ("high", Field::High),
    ("最低", Field::Low),
    ("low", Field::Low),
    ("成交量", Field::Volume),
    ("volume", Field::Volume),
    ("成交额", Field::Amount),
    ("amount", Field::Amount),
    ("振幅", Field::Amplitude),
    ("amplitude", Field::Amplitude),
    ("涨跌幅", Field::PriceChangeRate),
    ("pricechangerate", Field::PriceChangeRate),
    ("涨跌额", Field::PriceChangeAmount),
    ("pricechangeamount", Field::PriceChangeAmount),
    ("换手率", Field::TurnoverRate),
    ("turnoverrate", Field::TurnoverRate),
    ("主力净流入", Field::MainNetInflow),
    ("mainnetinflow", Field::MainNetInflow),
    ("主力净流入占比", Field::MainNetInflowRatio),
    ("mainnetinflowratio", Field::MainNetInflowRatio),
];

fn field_for(label: &str) -> Option<Field> {
    let key: String = label
        .trim()
        .chars()
        .filter(|c| *c != '_' && *c != ' ')
        .flat_map(char::to_lowercase)
        .collect();
    ALIASES.iter().find(|(alias, _)| *alias == key).map(|(_, field)| *field)
}

/// Numeric cell, or NaN when absent or unparseable.
fn number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().trim_end_matches('%').replace(',', "").parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn row_fields(row: &RawRow) -> (Option<NaiveDate>, Vec<(Field, f64)>) {
    let mut date = None;
    let mut fields = Vec::with_capacity(row.len());
    for (label, value) in row {
        match field_for(label) {
            Some(Field::Date) => date = parse_row_date(value),
            Some(field) => fields.push((field, number(value))),
            None => {}
        }
    }
    (date, fields)
}

#[derive(Debug, Clone, Copy)]
struct RawBar {
    open: f64,
    close: f64,
    high: f64,
    low: f64,
    volume: f64,
    amount: f64,
    amplitude: f64,
    price_change_rate: f64,
    price_change_amount: f64,
    turnover_rate: f64,
}

impl Default for RawBar {
    fn default() -> Self {
        Self {
            open: f64::NAN,
            close: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            volume: f64::NAN,
            amount: f64::NAN,
            amplitude: f64::NAN,
            price_change_rate: f64::NAN,
            price_change_amount: f64::NAN,
            turnover_rate: f64::NAN,
        }
    }
}

/// Replace non-finite cells with the previous finite value, then 0.
fn forward_fill(values: &mut [f64]) {
    let mut last = f64::NAN;
    for v in values.iter_mut() {
        if v.is_finite() {
            last = *v;
        } else {
            *v = last;
        }
    }
    for v in values.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
}

fn optional(values: Vec<Option<f64>>) -> Vec<f64> {
    values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()
}

fn ratio(num: &[f64], den: &[f64]) -> Vec<f64> {
    num.iter().zip(den).map(|(n, d)| n / d).collect()
}

/// Builds a canonical [`TimeSeries`] from provider rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeriesNormalizer;

impl SeriesNormalizer {
    /// Fetch quotes and money flow, then normalize. A money-flow failure is
    /// tolerated; a quote failure is not.
    pub async fn load(
        provider: &dyn MarketDataProvider,
        ticker: &str,
        range: &DateRange,
    ) -> Result<TimeSeries, PipelineError> {
        let quotes = provider
            .fetch_quotes(ticker, range)
            .await
            .map_err(|e| PipelineError::data_unavailable(ticker, e.to_string()))?;

        let money_flow = match provider.fetch_money_flow(ticker).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Money flow unavailable for {}, defaulting to 0: {}", ticker, e);
                Vec::new()
            }
        };

        Self::normalize(ticker, &quotes, &money_flow)
    }

    pub fn normalize(ticker: &str, quotes: &[RawRow], money_flow: &[RawRow]) -> Result<TimeSeries, PipelineError> {
        if quotes.is_empty() {
            return Err(PipelineError::data_unavailable(ticker, "provider returned no quote rows"));
        }

        let mut by_date: BTreeMap<NaiveDate, RawBar> = BTreeMap::new();
        let mut saw_close = false;
        for (i, row) in quotes.iter().enumerate() {
            let (date, fields) = row_fields(row);
            let date = date.ok_or_else(|| PipelineError::data_unavailable(ticker, format!("quote row {} has no parseable date", i)))?;

            let mut bar = RawBar::default();
            for (field, value) in fields {
                match field {
                    Field::Open => bar.open = value,
                    Field::Close => {
                        saw_close = true;
                        bar.close = value;
                    }
                    Field::High => bar.high = value,
                    Field::Low => bar.low = value,
                    Field::Volume => bar.volume = value,
                    Field::Amount => bar.amount = value,
                    Field::Amplitude => bar.amplitude = value,
                    Field::PriceChangeRate => bar.price_change_rate = value,
                    Field::PriceChangeAmount => bar.price_change_amount = value,
                    Field::TurnoverRate => bar.turnover_rate = value,
                    Field::Date | Field::MainNetInflow | Field::MainNetInflowRatio => {}
                }
            }
            if by_date.insert(date, bar).is_some() {
                debug!("{}: duplicate quote row for {}, keeping the later one", ticker, date);
            }
        }
        if !saw_close {
            return Err(PipelineError::data_unavailable(ticker, "quote rows carry no close column"));
        }

        let mut flows: BTreeMap<NaiveDate, (f64, f64)> = BTreeMap::new();
        for row in money_flow {
            let (date, fields) = row_fields(row);
            let Some(date) = date else {
                debug!("{}: skipping money-flow row without a date", ticker);
                continue;
            };
            let mut flow = (f64::NAN, f64::NAN);
            for (field, value) in fields {
                match field {
                    Field::MainNetInflow => flow.0 = value,
                    Field::MainNetInflowRatio => flow.1 = value,
                    _ => {}
                }
            }
            flows.insert(date, flow);
        }

        let dates: Vec<NaiveDate> = by_date.keys().copied().collect();
        let raw: Vec<RawBar> = by_date.into_values().collect();
        let column = |f: fn(&RawBar) -> f64| -> Vec<f64> { raw.iter().map(f).collect() };

        let mut open = column(|b| b.open);
        let mut close = column(|b| b.close);
        let mut high = column(|b| b.high);
        let mut low = column(|b| b.low);
        let mut volume = column(|b| b.volume);
        let mut amount = column(|b| b.amount);
        let mut amplitude = column(|b| b.amplitude);
        let mut price_change_rate = column(|b| b.price_change_rate);
        let mut price_change_amount = column(|b| b.price_change_amount);
        let mut turnover_rate = column(|b| b.turnover_rate);
        let (mut main_net_inflow, mut main_net_inflow_ratio): (Vec<f64>, Vec<f64>) = dates
            .iter()
            .map(|d| {
                let (inflow, ratio) = flows.get(d).copied().unwrap_or((0.0, 0.0));
                (
                    if inflow.is_nan() { 0.0 } else { inflow },
                    if ratio.is_nan() { 0.0 } else { ratio },
                )
            })
            .unzip();

        let mut close_filled = close.clone();
        let mut last = f64::NAN;
        for v in close_filled.iter_mut() {
            if v.is_finite() {
                last = *v;
            } else {
                *v = last;
            }
        }

        let mut ma_5 = optional(sma_series(&close_filled, 5));
        let mut ma_10 = optional(sma_series(&close_filled, 10));
        let mut ma_20 = optional(sma_series(&close_filled, 20));
        let mut ma_60 = optional(sma_series(&close_filled, 60));
        let mut rsi_14 = optional(rsi_series(&close_filled, 14));
        let macd = macd_series(&close_filled, 12, 26, 9);
        let mut macd_line: Vec<f64> = macd.iter().map(|m| m.macd_line).collect();
        let mut macd_signal: Vec<f64> = macd.iter().map(|m| m.signal_line).collect();
        let mut close_open_ratio = ratio(&close, &open);
        let mut high_low_ratio = ratio(&high, &low);

        for col in [
            &mut open,
            &mut close,
            &mut high,
            &mut low,
            &mut volume,
            &mut amount,
            &mut amplitude,
            &mut price_change_rate,
            &mut price_change_amount,
            &mut turnover_rate,
            &mut main_net_inflow,
            &mut main_net_inflow_ratio,
            &mut ma_5,
            &mut ma_10,
            &mut ma_20,
            &mut ma_60,
            &mut rsi_14,
            &mut macd_line,
            &mut macd_signal,
            &mut close_open_ratio,
            &mut high_low_ratio,
        ] {
            forward_fill(col);
        }

        let bars = dates
            .iter()
            .enumerate()
            .map(|(i, &date)| DailyBar {
                date,
                open: open[i],
                high: high[i],
                low: low[i],
                close: close[i],
                volume: volume[i],
                amount: amount[i],
                turnover_rate: turnover_rate[i],
                price_change_rate: price_change_rate[i],
                price_change_amount: price_change_amount[i],
                amplitude: amplitude[i],
                main_net_inflow: main_net_inflow[i],
                main_net_inflow_ratio: main_net_inflow_ratio[i],
                ma_5: ma_5[i],
                ma_10: ma_10[i],
                ma_20: ma_20[i],
                ma_60: ma_60[i],
                rsi_14: rsi_14[i],
                macd: macd_line[i],
                macd_signal: macd_signal[i],
                close_open_ratio: close_open_ratio[i],
                high_low_ratio: high_low_ratio[i],
            })
            .collect();

        debug!("{}: normalized {} rows ({} with money flow)", ticker, dates.len(), flows.len());
        TimeSeries::new(ticker, bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockMarketDataProvider;
    use anyhow::anyhow;
    use chrono::Duration;
    use serde_json::json;

    fn quote(date: NaiveDate, close: f64) -> RawRow {
        let value = json!({
            "日期": date.format("%Y-%m-%d").to_string(),
            "开盘": close - 0.5,
            "收盘": close,
            "最高": close + 1.0,
            "最低": close - 1.0,
            "成交量": 1000,
            "换手率": "1.25",
            "涨跌幅": 0.3,
        });
        value.as_object().cloned().unwrap()
    }

    fn day(i: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(i)
    }

    #[test]
    fn test_aliases_and_indicators() {
        let quotes: Vec<RawRow> = (0..30).map(|i| quote(day(i), 10.0 + i as f64)).collect();
        let series = SeriesNormalizer::normalize("600519", &quotes, &[]).unwrap();

        assert_eq!(series.len(), 30);
        let last = series.last().unwrap();
        assert_eq!(last.close, 39.0);
        assert_eq!(last.turnover_rate, 1.25);
        assert_eq!(last.ma_5, 37.0);
        assert_eq!(last.ma_20, 29.5);
        // Not enough history for MA60: stays 0.
        assert_eq!(last.ma_60, 0.0);
        assert_eq!(last.rsi_14, 100.0);
        assert!(last.macd > 0.0);
        assert!((last.close_open_ratio - 39.0 / 38.5).abs() < 1e-12);
        assert_eq!(series.bars()[0].ma_5, 0.0);
        assert_eq!(last.main_net_inflow, 0.0);
    }

    #[test]
    fn test_money_flow_left_join() {
        let quotes: Vec<RawRow> = (0..3).map(|i| quote(day(i), 10.0)).collect();
        let flow = json!({"日期": "2024-01-02", "主力净流入": 1.5e7, "主力净流入占比": 3.2});
        let extra = json!({"date": "2023-12-31", "MainNetInflow": 9.0});
        let flows = vec![flow.as_object().cloned().unwrap(), extra.as_object().cloned().unwrap()];
        let series = SeriesNormalizer::normalize("600519", &quotes, &flows).unwrap();

        let inflows: Vec<f64> = series.bars().iter().map(|b| b.main_net_inflow).collect();
        assert_eq!(inflows, vec![0.0, 1.5e7, 0.0]);
        assert_eq!(series.bars()[1].main_net_inflow_ratio, 3.2);
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn test_infinite_and_missing_cells_forward_fill() {
        let mut quotes: Vec<RawRow> = (0..4).map(|i| quote(day(i), 10.0 + i as f64)).collect();
        quotes[2].insert("开盘".into(), json!(0.0));
        quotes[3].insert("换手率".into(), json!("--"));
        let series = SeriesNormalizer::normalize("600519", &quotes, &[]).unwrap();

        // close/open is infinite on day 2 and takes day 1's value.
        assert_eq!(series.bars()[2].close_open_ratio, series.bars()[1].close_open_ratio);
        assert_eq!(series.bars()[3].turnover_rate, 1.25);
        assert!(series.bars().iter().all(|b| b.high_low_ratio.is_finite()));
    }

    #[test]
    fn test_unordered_and_duplicate_rows() {
        let quotes = vec![quote(day(2), 12.0), quote(day(0), 10.0), quote(day(2), 13.0)];
        let series = SeriesNormalizer::normalize("600519", &quotes, &[]).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars()[0].date, day(0));
        assert_eq!(series.bars()[1].close, 13.0);
    }

    #[test]
    fn test_unusable_output_is_data_unavailable() {
        assert!(matches!(
            SeriesNormalizer::normalize("600519", &[], &[]),
            Err(PipelineError::DataUnavailable { .. })
        ));

        let no_date = json!({"收盘": 1.0}).as_object().cloned().unwrap();
        assert!(SeriesNormalizer::normalize("600519", &[no_date], &[]).is_err());

        let no_close = json!({"日期": "2024-01-01", "开盘": 1.0}).as_object().cloned().unwrap();
        assert!(SeriesNormalizer::normalize("600519", &[no_close], &[]).is_err());
    }

    #[tokio::test]
    async fn test_load_tolerates_money_flow_failure() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_fetch_quotes()
            .returning(|_, _| Ok((0..5).map(|i| quote(day(i), 10.0)).collect()));
        provider
            .expect_fetch_money_flow()
            .returning(|_| Err(anyhow!("endpoint down")));

        let range = DateRange::new(day(0), day(10)).unwrap();
        let series = SeriesNormalizer::load(&provider, "600519", &range).await.unwrap();
        assert_eq!(series.len(), 5);
        assert!(series.bars().iter().all(|b| b.main_net_inflow == 0.0));
    }

    #[tokio::test]
    async fn test_load_quote_failure_is_data_unavailable() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_fetch_quotes()
            .returning(|_, _| Err(anyhow!("timeout")));
        provider.expect_fetch_money_flow().returning(|_| Ok(Vec::new()));

        let range = DateRange::new(day(0), day(10)).unwrap();
        let err = SeriesNormalizer::load(&provider, "600519", &range).await.unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable { .. }));
    }
}
