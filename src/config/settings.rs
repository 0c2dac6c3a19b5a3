use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{DateRange, StorageConfig};
use crate::ml::ensemble::TrainerSettings;
use crate::ml::sampler::LabelRule;
use crate::ml::selection::SelectionSettings;
use crate::ml::statistics::FeatureSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataSettings,
    pub pipeline: PipelineSettings,
    pub selection: SelectionSettings,
    pub training: TrainerSettings,
    pub store: StoreSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Data
        if self.data.tickers.is_empty() {
            errors.push("data.tickers must not be empty".to_string());
        }
        if let Err(e) = DateRange::parse(&self.data.train_start, &self.data.train_end) {
            errors.push(format!("data.train_start/train_end: {}", e));
        }
        if self.data.lookback_days <= 0 {
            errors.push("data.lookback_days must be > 0".to_string());
        }
        if self.data.provider == ProviderKind::File && self.data.data_dir.is_none() {
            errors.push("data.data_dir is required for the file provider".to_string());
        }
        if self.data.storage.timeout_secs == 0 {
            errors.push("data.storage.timeout_secs must be > 0".to_string());
        }

        // Pipeline
        if self.pipeline.window_size == 0 {
            errors.push("pipeline.window_size must be > 0".to_string());
        }
        if self.pipeline.forecast_horizon == 0 {
            errors.push("pipeline.forecast_horizon must be > 0".to_string());
        }
        if !(self.pipeline.test_fraction > 0.0 && self.pipeline.test_fraction < 1.0) {
            errors.push("pipeline.test_fraction must be between 0 and 1".to_string());
        }
        if let LabelRule::BelowMovingAverage { period: 0 } = self.pipeline.label_rule {
            errors.push("pipeline.label_rule.period must be > 0".to_string());
        }

        // Selection
        if !(self.selection.fdr_level > 0.0 && self.selection.fdr_level < 1.0) {
            errors.push("selection.fdr_level must be between 0 and 1".to_string());
        }
        if !(self.selection.importance_share > 0.0 && self.selection.importance_share <= 1.0) {
            errors.push("selection.importance_share must be in (0, 1]".to_string());
        }
        if self.selection.forest_trees == 0 {
            errors.push("selection.forest_trees must be > 0".to_string());
        }

        // Training
        if !(0.0..=1.0).contains(&self.training.min_recall) {
            errors.push("training.min_recall must be between 0 and 1".to_string());
        }
        if self.training.smote_neighbors == 0 {
            errors.push("training.smote_neighbors must be > 0".to_string());
        }
        if self.training.random_forest.n_trees == 0 {
            errors.push("training.random_forest.n_trees must be > 0".to_string());
        }
        for (name, params) in [
            ("gradient_boosting", &self.training.gradient_boosting),
            ("leafwise_boosting", &self.training.leafwise_boosting),
        ] {
            if let Err(e) = params.validate() {
                errors.push(format!("training.{}: {}", name, e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn train_range(&self) -> anyhow::Result<DateRange> {
        DateRange::parse(&self.data.train_start, &self.data.train_end)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Eastmoney,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub provider: ProviderKind,
    /// Directory of `{ticker}.json` files for the file provider.
    pub data_dir: Option<PathBuf>,
    pub tickers: Vec<String>,
    /// `YYYYMMDD`
    pub train_start: String,
    pub train_end: String,
    /// Calendar days of history fetched for a prediction.
    pub lookback_days: i64,
    pub storage: StorageConfig,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Eastmoney,
            data_dir: None,
            tickers: ["600519", "000001", "600036", "000002", "600410"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            train_start: "20240101".to_string(),
            train_end: "20250930".to_string(),
            lookback_days: 365,
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub window_size: usize,
    pub forecast_horizon: usize,
    pub use_multi_models: bool,
    pub feature_set: FeatureSet,
    pub label_rule: LabelRule,
    pub extraction_workers: usize,
    pub test_fraction: f64,
    pub split_seed: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window_size: 20,
            forecast_horizon: 5,
            use_multi_models: true,
            feature_set: FeatureSet::Minimal,
            label_rule: LabelRule::default(),
            extraction_workers: 4,
            test_fraction: 0.2,
            split_seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("trendcast_models"),
        }
    }
}
