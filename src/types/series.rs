use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;

/// One normalized trading day. Every field is finite once the normalizer
/// has run; derived indicators that never warmed up are 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: f64,
    pub turnover_rate: f64,
    pub price_change_rate: f64,
    pub price_change_amount: f64,
    pub amplitude: f64,
    pub main_net_inflow: f64,
    pub main_net_inflow_ratio: f64,
    pub ma_5: f64,
    pub ma_10: f64,
    pub ma_20: f64,
    pub ma_60: f64,
    pub rsi_14: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub close_open_ratio: f64,
    pub high_low_ratio: f64,
}

impl DailyBar {
    pub fn signal(&self, signal: Signal) -> f64 {
        match signal {
            Signal::Close => self.close,
            Signal::Open => self.open,
            Signal::High => self.high,
            Signal::Low => self.low,
            Signal::Volume => self.volume,
            Signal::TurnoverRate => self.turnover_rate,
            Signal::PriceChangeRate => self.price_change_rate,
            Signal::MainNetInflow => self.main_net_inflow,
            Signal::MainNetInflowRatio => self.main_net_inflow_ratio,
        }
    }
}

/// Date-ordered daily bars for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    ticker: String,
    bars: Vec<DailyBar>,
}

impl TimeSeries {
    /// Build a series, rejecting out-of-order or duplicate dates.
    pub fn new(ticker: impl Into<String>, bars: Vec<DailyBar>) -> Result<Self, PipelineError> {
        let ticker = ticker.into();
        if let Some(pair) = bars.windows(2).find(|w| w[0].date >= w[1].date) {
            return Err(PipelineError::data_unavailable(
                &ticker,
                format!("dates not strictly increasing at {} -> {}", pair[0].date, pair[1].date),
            ));
        }
        Ok(Self { ticker, bars })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn bars(&self) -> &[DailyBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&DailyBar> {
        self.bars.last()
    }

    pub fn last_n(&self, n: usize) -> &[DailyBar] {
        let len = self.bars.len();
        if n >= len {
            &self.bars[..]
        } else {
            &self.bars[len - n..]
        }
    }

    pub fn values(&self, signal: Signal) -> Vec<f64> {
        self.bars.iter().map(|b| b.signal(signal)).collect()
    }
}

/// A tracked quantity from which window statistics are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Signal {
    Close,
    Open,
    High,
    Low,
    Volume,
    TurnoverRate,
    PriceChangeRate,
    MainNetInflow,
    MainNetInflowRatio,
}

impl Signal {
    pub const ALL: [Signal; 9] = [
        Signal::Close,
        Signal::Open,
        Signal::High,
        Signal::Low,
        Signal::Volume,
        Signal::TurnoverRate,
        Signal::PriceChangeRate,
        Signal::MainNetInflow,
        Signal::MainNetInflowRatio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Close => "Close",
            Signal::Open => "Open",
            Signal::High => "High",
            Signal::Low => "Low",
            Signal::Volume => "Volume",
            Signal::TurnoverRate => "TurnoverRate",
            Signal::PriceChangeRate => "PriceChangeRate",
            Signal::MainNetInflow => "MainNetInflow",
            Signal::MainNetInflowRatio => "MainNetInflowRatio",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binary forecast class. `Weak` is the positive class (label 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trend {
    Strong = 0,
    Weak = 1,
}

impl Trend {
    pub fn from_label(label: u8) -> Self {
        if label == 0 {
            Trend::Strong
        } else {
            Trend::Weak
        }
    }

    pub fn from_probability(p_weak: f64, threshold: f64) -> Self {
        if p_weak >= threshold {
            Trend::Weak
        } else {
            Trend::Strong
        }
    }

    pub fn label(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Strong => "strong (>= MA20)",
            Trend::Weak => "weak (< MA20)",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, close: f64) -> DailyBar {
        DailyBar {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            close,
            ..Default::default()
        }
    }

    #[test]
    fn test_series_rejects_unordered_dates() {
        let bars = vec![bar(2, 1.0), bar(1, 2.0)];
        assert!(TimeSeries::new("600519", bars).is_err());

        let dup = vec![bar(1, 1.0), bar(1, 2.0)];
        assert!(TimeSeries::new("600519", dup).is_err());
    }

    #[test]
    fn test_series_last_n() {
        let series = TimeSeries::new("600519", (1..=5).map(|d| bar(d, d as f64)).collect()).unwrap();
        assert_eq!(series.last_n(2).len(), 2);
        assert_eq!(series.last_n(2)[0].close, 4.0);
        assert_eq!(series.last_n(10).len(), 5);
    }

    #[test]
    fn test_trend_labels() {
        assert_eq!(Trend::from_label(0), Trend::Strong);
        assert_eq!(Trend::from_label(1), Trend::Weak);
        assert_eq!(Trend::Weak.label(), 1);
        assert_eq!(Trend::from_probability(0.5, 0.5), Trend::Weak);
        assert_eq!(Trend::from_probability(0.49, 0.5), Trend::Strong);
    }
}
