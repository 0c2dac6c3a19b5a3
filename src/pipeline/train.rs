use chrono::Utc;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use super::PredictionRunner;
use crate::data::SeriesNormalizer;
use crate::error::PipelineError;
use crate::ml::ensemble::EnsembleTrainer;
use crate::ml::persistence::{BlobStore, ModelInfo, ModelStore, TrainedModel};
use crate::ml::selection::FeatureSelector;
use crate::ml::sampler::Window;
use crate::types::{TimeSeries, Trend};

/// Split row indices into `(train, test)` keeping the class mix of `labels`
/// in both parts. Each class with at least two rows contributes at least one
/// row to each side. Indices come back sorted.
pub fn stratified_split(labels: &[Trend], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();

    for class in [Trend::Strong, Trend::Weak] {
        let mut members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        if members.is_empty() {
            continue;
        }
        members.shuffle(&mut rng);
        let n = members.len();
        let n_test = if n < 2 {
            0
        } else {
            ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1)
        };
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

impl PredictionRunner {
    /// Fetch every ticker over the configured training range and train on the
    /// pooled samples. Tickers whose data cannot be loaded are skipped.
    pub async fn train_stock_prediction_model(
        &self,
        tickers: &[String],
        window_size: usize,
        horizon: usize,
        use_multi_models: bool,
    ) -> Result<TrainedModel, PipelineError> {
        let all = tickers.join(",");
        let range = self
            .config
            .train_range()
            .map_err(|e| PipelineError::data_unavailable(&all, e.to_string()))?;

        info!("Loading {} tickers for {}", tickers.len(), range);
        let mut series = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            match SeriesNormalizer::load(self.provider(), ticker, &range).await {
                Ok(s) => {
                    info!("{}: {} daily rows", ticker, s.len());
                    series.push(s);
                }
                Err(e) => warn!("Skipping {}: {}", ticker, e),
            }
        }

        if series.is_empty() {
            return Err(PipelineError::data_unavailable(&all, "no ticker returned usable data"));
        }

        self.train_from_series(&series, window_size, horizon, use_multi_models)
    }

    /// CPU half of training: sample, extract, select, split, fit.
    pub fn train_from_series(
        &self,
        series: &[TimeSeries],
        window_size: usize,
        horizon: usize,
        use_multi_models: bool,
    ) -> Result<TrainedModel, PipelineError> {
        let required = window_size + horizon;
        if let Some(longest) = series.iter().max_by_key(|s| s.len()) {
            if longest.len() < required {
                return Err(PipelineError::InsufficientHistory {
                    ticker: longest.ticker().to_string(),
                    available: longest.len(),
                    required,
                });
            }
        }

        let sampler = self.sampler(window_size, horizon);
        let samples: Vec<_> = series.iter().flat_map(|s| sampler.build_samples(s)).collect();
        if samples.is_empty() {
            return Err(PipelineError::NoSamples {
                window: window_size,
                horizon,
            });
        }

        let windows: Vec<Window<'_>> = samples.iter().map(|s| s.window).collect();
        let labels: Vec<Trend> = samples.iter().map(|s| s.label).collect();
        let weak = labels.iter().filter(|&&l| l == Trend::Weak).count();
        info!(
            "Built {} samples from {} series ({} weak, {} strong)",
            samples.len(),
            series.len(),
            weak,
            samples.len() - weak
        );

        let extraction = self.extractor().extract(&windows)?;
        if extraction.is_degraded() {
            let dropped: Vec<String> = extraction.dropped.iter().map(|(s, _)| s.to_string()).collect();
            warn!("Extraction degraded, dropped signals: {}", dropped.join(", "));
        }

        let selection = FeatureSelector::new(self.config.selection.clone()).select(&extraction.frame, &labels);
        let frame = selection.frame.sanitized();
        info!("Training on {} features", frame.n_cols());

        let (train_idx, test_idx) =
            stratified_split(&labels, self.config.pipeline.test_fraction, self.config.pipeline.split_seed);
        let pick = |idx: &[usize]| -> Vec<Trend> { idx.iter().map(|&i| labels[i]).collect() };

        let trainer = EnsembleTrainer::new(self.config.training.clone());
        let outcome = trainer.train(
            &frame.select_rows(&train_idx),
            &frame.select_rows(&test_idx),
            &pick(&train_idx),
            &pick(&test_idx),
            use_multi_models,
        )?;

        for failure in &outcome.failures {
            warn!("{} was left out of the ensemble: {}", failure.family, failure.error);
        }

        let info = ModelInfo {
            model_name: outcome.best.family,
            train_date: Utc::now(),
            accuracy: outcome.best.accuracy,
            avg_precision: outcome.best.avg_precision,
            families: outcome.ensemble.families(),
            n_features: outcome.feature_list().len(),
            train_samples: samples.len(),
            window_size,
            forecast_horizon: horizon,
        };
        info!(
            "Training complete: best {} accuracy={:.4} avg_precision={:.4}",
            info.model_name, info.accuracy, info.avg_precision
        );

        Ok(TrainedModel {
            best: outcome.best,
            ensemble: outcome.ensemble,
            info,
            failures: outcome.failures,
        })
    }

    /// Load the stored model, or train with the configured tickers and store
    /// the result when nothing is stored yet.
    pub async fn load_or_train<S: BlobStore>(&self, store: &ModelStore<S>) -> Result<TrainedModel, PipelineError> {
        if let Some(model) = store.get()? {
            info!("Loaded stored model {} ({} families)", model.info.model_name, model.ensemble.len());
            return Ok(model);
        }

        info!("No stored model, training a new one");
        let pipeline = &self.config.pipeline;
        let model = self
            .train_stock_prediction_model(
                &self.config.data.tickers,
                pipeline.window_size,
                pipeline.forecast_horizon,
                pipeline.use_multi_models,
            )
            .await?;
        store.put(&model)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockMarketDataProvider;
    use crate::ml::model::ModelFamily;
    use crate::ml::persistence::MemoryBlobStore;
    use crate::pipeline::fixtures::{light_config, money_flow, quotes};
    use anyhow::anyhow;
    use std::sync::Arc;

    fn provider(rows: usize) -> MockMarketDataProvider {
        let mut provider = MockMarketDataProvider::new();
        provider.expect_fetch_quotes().returning(move |_, _| Ok(quotes(rows)));
        provider.expect_fetch_money_flow().returning(move |_| Ok(money_flow(rows)));
        provider
    }

    #[test]
    fn test_stratified_split_keeps_class_mix() {
        let labels: Vec<Trend> = (0..100).map(|i| if i % 4 == 0 { Trend::Weak } else { Trend::Strong }).collect();
        let (train, test) = stratified_split(&labels, 0.2, 42);

        assert_eq!(train.len() + test.len(), 100);
        assert_eq!(test.len(), 20);
        assert_eq!(test.iter().filter(|&&i| labels[i] == Trend::Weak).count(), 5);
        assert!(train.iter().all(|i| !test.contains(i)));
        assert_eq!(stratified_split(&labels, 0.2, 42), (train, test));
    }

    #[test]
    fn test_stratified_split_tiny_classes() {
        let labels = vec![Trend::Strong, Trend::Strong, Trend::Weak];
        let (train, test) = stratified_split(&labels, 0.2, 7);
        assert_eq!(test.len(), 1);
        assert!(train.contains(&2));
    }

    #[tokio::test]
    async fn test_single_family_training() {
        let runner = PredictionRunner::new(Arc::new(provider(400)), light_config());
        let tickers = vec!["600519".to_string()];
        let model = runner.train_stock_prediction_model(&tickers, 20, 5, false).await.unwrap();

        assert_eq!(model.ensemble.len(), 1);
        assert_eq!(model.best.family, ModelFamily::RandomForest);
        assert_eq!(model.info.train_samples, 375);
        assert_eq!(model.info.window_size, 20);
        assert_eq!(model.info.forecast_horizon, 5);
        assert_eq!(model.info.n_features, model.feature_list().len());
        assert!(!model.feature_list().is_empty());
        assert!((0.10..=0.94).contains(&model.best.threshold) || model.best.threshold == 0.5);
    }

    #[tokio::test]
    async fn test_multi_family_training_pools_tickers() {
        let runner = PredictionRunner::new(Arc::new(provider(300)), light_config());
        let tickers = vec!["600519".to_string(), "000001".to_string()];
        let model = runner.train_stock_prediction_model(&tickers, 20, 5, true).await.unwrap();

        assert_eq!(model.info.train_samples, 2 * 275);
        assert_eq!(model.ensemble.len() + model.failures.len(), 3);
        assert_eq!(model.ensemble.families()[0], ModelFamily::RandomForest);
        let best = model.ensemble.best();
        assert!(model.ensemble.bundles().iter().all(|b| b.avg_precision <= best.avg_precision));
    }

    #[tokio::test]
    async fn test_failing_tickers_are_skipped() {
        let mut provider = MockMarketDataProvider::new();
        provider.expect_fetch_quotes().returning(|ticker, _| {
            if ticker == "000001" {
                Err(anyhow!("delisted"))
            } else {
                Ok(quotes(300))
            }
        });
        provider.expect_fetch_money_flow().returning(|_| Ok(Vec::new()));

        let runner = PredictionRunner::new(Arc::new(provider), light_config());
        let tickers = vec!["000001".to_string(), "600519".to_string()];
        let model = runner.train_stock_prediction_model(&tickers, 20, 5, false).await.unwrap();
        assert_eq!(model.info.train_samples, 275);
    }

    #[tokio::test]
    async fn test_no_usable_ticker_is_data_unavailable() {
        let mut provider = MockMarketDataProvider::new();
        provider.expect_fetch_quotes().returning(|_, _| Ok(Vec::new()));
        provider.expect_fetch_money_flow().returning(|_| Ok(Vec::new()));

        let runner = PredictionRunner::new(Arc::new(provider), light_config());
        let err = runner
            .train_stock_prediction_model(&["600519".to_string()], 20, 5, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_short_history_is_insufficient() {
        let runner = PredictionRunner::new(Arc::new(provider(24)), light_config());
        let err = runner
            .train_stock_prediction_model(&["600519".to_string()], 20, 5, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientHistory { available: 24, required: 25, .. }
        ));
    }

    #[tokio::test]
    async fn test_history_of_exactly_window_plus_horizon_has_no_samples() {
        let runner = PredictionRunner::new(Arc::new(provider(25)), light_config());
        let err = runner
            .train_stock_prediction_model(&["600519".to_string()], 20, 5, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoSamples { window: 20, horizon: 5 }));
    }

    #[tokio::test]
    async fn test_load_or_train_trains_once() {
        let mut mock = MockMarketDataProvider::new();
        mock.expect_fetch_quotes().times(2).returning(|_, _| Ok(quotes(300)));
        mock.expect_fetch_money_flow().times(2).returning(|_| Ok(Vec::new()));

        let mut config = light_config();
        config.pipeline.use_multi_models = false;
        let runner = PredictionRunner::new(Arc::new(mock), config);
        let store = ModelStore::new(MemoryBlobStore::new());

        let first = runner.load_or_train(&store).await.unwrap();
        let second = runner.load_or_train(&store).await.unwrap();
        assert_eq!(first.best.family, second.best.family);
        assert_eq!(first.info.train_samples, second.info.train_samples);
        assert_eq!(first.feature_list(), second.feature_list());
    }
}
