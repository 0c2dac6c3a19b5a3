use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::types::{DailyBar, TimeSeries, Trend};

/// How a forward bar is judged weak. Kept as a policy value so alternative
/// averaging periods can be evaluated without touching the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum LabelRule {
    /// Weak when `close < SMA(period)` at the label index. Period 20 reads
    /// the normalizer's precomputed MA20 column.
    BelowMovingAverage { period: usize },
}

impl Default for LabelRule {
    fn default() -> Self {
        LabelRule::BelowMovingAverage { period: 20 }
    }
}

impl LabelRule {
    /// Label of `bars[index]`. The average needs `period` bars ending at
    /// `index`; before that it is undefined and the bar counts as strong,
    /// matching the normalizer's MA20 column, which stays 0 until warm.
    pub fn label_at(&self, bars: &[DailyBar], index: usize) -> Trend {
        match *self {
            LabelRule::BelowMovingAverage { period } => {
                let bar = &bars[index];
                let average = if period == 20 {
                    bar.ma_20
                } else if period == 0 || index + 1 < period {
                    return Trend::Strong;
                } else {
                    let slice = &bars[index + 1 - period..=index];
                    slice.iter().map(|b| b.close).sum::<f64>() / period as f64
                };
                if bar.close < average {
                    Trend::Weak
                } else {
                    Trend::Strong
                }
            }
        }
    }
}

/// A borrowed slice `[end - W, end)` of one ticker's series.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    ticker: &'a str,
    end: usize,
    bars: &'a [DailyBar],
}

impl<'a> Window<'a> {
    pub fn new(ticker: &'a str, end: usize, bars: &'a [DailyBar]) -> Self {
        Self { ticker, end, bars }
    }

    pub fn ticker(&self) -> &'a str {
        self.ticker
    }

    /// Exclusive end index in the source series.
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn bars(&self) -> &'a [DailyBar] {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn id(&self) -> String {
        format!("{}_{}", self.ticker, self.end)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    pub window: Window<'a>,
    pub label: Trend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSampler {
    window_size: usize,
    horizon: usize,
    rule: LabelRule,
}

impl WindowSampler {
    pub fn new(window_size: usize, horizon: usize) -> Self {
        Self {
            window_size,
            horizon,
            rule: LabelRule::default(),
        }
    }

    pub fn with_rule(mut self, rule: LabelRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// One sample per end index `i` in `W..len-H`, labelled from bar `i + H`.
    /// Series shorter than `W + H` yield nothing.
    pub fn build_samples<'a>(&self, series: &'a TimeSeries) -> Vec<Sample<'a>> {
        let (w, h) = (self.window_size, self.horizon);
        let bars = series.bars();
        if w == 0 || bars.len() < w + h {
            return Vec::new();
        }

        (w..bars.len() - h)
            .map(|i| Sample {
                window: Window::new(series.ticker(), i, &bars[i - w..i]),
                label: self.rule.label_at(bars, i + h),
            })
            .collect()
    }

    /// The trailing `W` observations, used for inference.
    pub fn live_window<'a>(&self, series: &'a TimeSeries) -> Result<Window<'a>, PipelineError> {
        let bars = series.bars();
        if self.window_size == 0 || bars.len() < self.window_size {
            return Err(PipelineError::InsufficientHistory {
                ticker: series.ticker().to_string(),
                available: bars.len(),
                required: self.window_size,
            });
        }
        let end = bars.len();
        Ok(Window::new(series.ticker(), end, &bars[end - self.window_size..]))
    }
}
