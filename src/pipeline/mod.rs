//! End-to-end training and inference over a market-data provider.

pub mod predict;
pub mod train;

pub use predict::{MarketSnapshot, PredictionOutcome, PredictionResult};
pub use train::stratified_split;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::data::MarketDataProvider;
use crate::ml::features::FeatureExtractor;
use crate::ml::sampler::WindowSampler;
use crate::types::Signal;

/// Owns the provider and settings shared by the training and prediction
/// entry points.
#[derive(Clone)]
pub struct PredictionRunner {
    provider: Arc<dyn MarketDataProvider>,
    config: AppConfig,
}

impl PredictionRunner {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: AppConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn provider(&self) -> &dyn MarketDataProvider {
        self.provider.as_ref()
    }

    fn sampler(&self, window_size: usize, horizon: usize) -> WindowSampler {
        WindowSampler::new(window_size, horizon).with_rule(self.config.pipeline.label_rule)
    }

    fn extractor(&self) -> FeatureExtractor {
        FeatureExtractor::new(Signal::ALL.to_vec(), self.config.pipeline.feature_set)
            .with_max_workers(self.config.pipeline.extraction_workers)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, NaiveDate};
    use serde_json::json;

    use crate::config::AppConfig;
    use crate::data::RawRow;

    /// Oscillating closes with a slow drift, so both labels occur.
    pub(crate) fn quotes(len: usize) -> Vec<RawRow> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        (0..len)
            .map(|i| {
                let t = i as f64;
                let close = 100.0 + 8.0 * (t / 6.0).sin() + 3.0 * (t / 17.0).cos() + 0.02 * t;
                let open = close - 0.6 * (t / 4.0).sin();
                let row = json!({
                    "日期": (start + Duration::days(i as i64)).format("%Y-%m-%d").to_string(),
                    "开盘": open,
                    "收盘": close,
                    "最高": close.max(open) + 0.8,
                    "最低": close.min(open) - 0.8,
                    "成交量": 10_000.0 + 2_500.0 * (t / 5.0).cos(),
                    "换手率": 1.0 + 0.3 * (t / 9.0).sin(),
                    "涨跌幅": 0.5 * (t / 6.0).cos(),
                });
                row.as_object().cloned().unwrap()
            })
            .collect()
    }

    pub(crate) fn money_flow(len: usize) -> Vec<RawRow> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        (0..len)
            .step_by(2)
            .map(|i| {
                let row = json!({
                    "日期": (start + Duration::days(i as i64)).format("%Y-%m-%d").to_string(),
                    "主力净流入": 1.0e6 * ((i as f64) / 6.0).cos(),
                    "主力净流入占比": 2.0 * ((i as f64) / 6.0).cos(),
                });
                row.as_object().cloned().unwrap()
            })
            .collect()
    }

    /// Small model families so end-to-end tests stay quick.
    pub(crate) fn light_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.training.random_forest.n_trees = 25;
        config.training.gradient_boosting.n_rounds = 30;
        config.training.leafwise_boosting.n_rounds = 30;
        config.selection.forest_trees = 20;
        config.data.tickers = vec!["600519".to_string(), "000001".to_string()];
        config
    }
}
