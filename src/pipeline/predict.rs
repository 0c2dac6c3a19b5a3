use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::PredictionRunner;
use crate::data::{DateRange, SeriesNormalizer};
use crate::error::PipelineError;
use crate::ml::align::align;
use crate::ml::ensemble::{score_ensemble, score_single, EnsemblePrediction, SinglePrediction};
use crate::ml::model::{Ensemble, ModelBundle};
use crate::ml::persistence::TrainedModel;
use crate::types::{FeatureName, Signal, TimeSeries, Trend};

/// Where the latest bar sits relative to its 20-day average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub date: NaiveDate,
    pub close: f64,
    pub ma20: f64,
    /// `(close - ma20) / ma20` in percent.
    pub position_pct: f64,
    pub status: Trend,
}

impl MarketSnapshot {
    /// Uses the normalized MA20, or the mean of the last 20 closes when the
    /// average never warmed up.
    pub fn from_series(series: &TimeSeries) -> Option<Self> {
        let last = series.last()?;
        let ma20 = if last.ma_20 != 0.0 {
            last.ma_20
        } else {
            let tail = series.last_n(20);
            tail.iter().map(|b| b.close).sum::<f64>() / tail.len() as f64
        };
        let position_pct = if ma20 != 0.0 { (last.close - ma20) / ma20 * 100.0 } else { 0.0 };
        Some(Self {
            date: last.date,
            close: last.close,
            ma20,
            position_pct,
            status: if last.close < ma20 { Trend::Weak } else { Trend::Strong },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PredictionOutcome {
    Single(SinglePrediction),
    Ensemble(EnsemblePrediction),
}

impl PredictionOutcome {
    pub fn label(&self) -> Trend {
        match self {
            PredictionOutcome::Single(p) => p.label,
            PredictionOutcome::Ensemble(p) => p.consensus.label,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PredictionResult {
    pub ticker: String,
    pub series: TimeSeries,
    pub snapshot: MarketSnapshot,
    pub outcome: PredictionOutcome,
    /// Signals that could not be extracted from the live window.
    pub dropped_signals: Vec<Signal>,
}

impl PredictionRunner {
    /// Predict one ticker from the `days` calendar days ending today.
    /// The ensemble is scored when it holds more than one family, otherwise
    /// `best` is used at its own threshold.
    pub async fn predict_single_stock_inline(
        &self,
        ticker: &str,
        best: &ModelBundle,
        ensemble: Option<&Ensemble>,
        feature_list: &[FeatureName],
        window_size: usize,
        days: i64,
    ) -> Result<PredictionResult, PipelineError> {
        let range = DateRange::trailing(Local::now().date_naive(), days);
        let series = SeriesNormalizer::load(self.provider(), ticker, &range).await?;
        self.predict_from_series(series, best, ensemble, feature_list, window_size)
    }

    pub fn predict_from_series(
        &self,
        series: TimeSeries,
        best: &ModelBundle,
        ensemble: Option<&Ensemble>,
        feature_list: &[FeatureName],
        window_size: usize,
    ) -> Result<PredictionResult, PipelineError> {
        let window = self.sampler(window_size, 0).live_window(&series)?;
        let (extracted, dropped) = self.extractor().extract_one(&window)?;
        let aligned = align(&extracted, feature_list);

        let outcome = match ensemble {
            Some(ensemble) if ensemble.len() > 1 => PredictionOutcome::Ensemble(score_ensemble(ensemble, &aligned)?),
            _ => PredictionOutcome::Single(score_single(best, &aligned)?),
        };
        let snapshot = MarketSnapshot::from_series(&series).ok_or_else(|| PipelineError::InsufficientHistory {
            ticker: series.ticker().to_string(),
            available: 0,
            required: window_size,
        })?;
        info!("{}: {} (close {:.2}, MA20 {:.2})", series.ticker(), outcome.label(), snapshot.close, snapshot.ma20);

        Ok(PredictionResult {
            ticker: series.ticker().to_string(),
            dropped_signals: dropped.into_iter().map(|(signal, _)| signal).collect(),
            snapshot,
            outcome,
            series,
        })
    }

    /// Predict each ticker with a trained model, keeping the successes.
    pub async fn predict_stocks_inline(
        &self,
        tickers: &[String],
        model: &TrainedModel,
        days: i64,
    ) -> Vec<PredictionResult> {
        let mut results = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            match self
                .predict_single_stock_inline(
                    ticker,
                    &model.best,
                    Some(&model.ensemble),
                    model.feature_list(),
                    model.info.window_size,
                    days,
                )
                .await
            {
                Ok(result) => results.push(result),
                Err(e) => warn!("Prediction failed for {}: {}", ticker, e),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockMarketDataProvider;
    use crate::ml::ensemble::ConsensusRating;
    use crate::ml::model::ModelFamily;
    use crate::pipeline::fixtures::{light_config, money_flow, quotes};
    use crate::types::DailyBar;
    use chrono::Duration;
    use std::sync::Arc;

    fn runner(rows: usize) -> PredictionRunner {
        let mut provider = MockMarketDataProvider::new();
        provider.expect_fetch_quotes().returning(move |_, _| Ok(quotes(rows)));
        provider.expect_fetch_money_flow().returning(move |_| Ok(money_flow(rows)));
        PredictionRunner::new(Arc::new(provider), light_config())
    }

    async fn trained(runner: &PredictionRunner, multi: bool) -> TrainedModel {
        runner
            .train_stock_prediction_model(&["600519".to_string()], 20, 5, multi)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_model_prediction() {
        let runner = runner(300);
        let model = trained(&runner, false).await;
        let result = runner
            .predict_single_stock_inline("600519", &model.best, Some(&model.ensemble), model.feature_list(), 20, 365)
            .await
            .unwrap();

        assert_eq!(result.ticker, "600519");
        assert_eq!(result.series.len(), 300);
        match &result.outcome {
            PredictionOutcome::Single(p) => {
                assert_eq!(p.family, ModelFamily::RandomForest);
                assert!((p.prob_strong + p.prob_weak - 1.0).abs() < 1e-9);
                assert_eq!(p.label, Trend::from_probability(p.prob_weak, p.threshold));
            }
            other => panic!("expected a single-model outcome, got {:?}", other),
        }
        assert!(result.dropped_signals.is_empty());
    }

    #[tokio::test]
    async fn test_ensemble_prediction_votes() {
        let runner = runner(300);
        let model = trained(&runner, true).await;
        assert!(model.ensemble.len() > 1);

        let results = runner
            .predict_stocks_inline(&["600519".to_string(), "000001".to_string()], &model, 365)
            .await;
        assert_eq!(results.len(), 2);
        match &results[0].outcome {
            PredictionOutcome::Ensemble(p) => {
                assert_eq!(p.families.len(), model.ensemble.len());
                assert_eq!(p.consensus.total(), p.families.len());
                assert_eq!(results[0].outcome.label(), p.consensus.label);
                if p.families.len() == 3 {
                    assert_ne!(p.consensus.rating, ConsensusRating::Divided);
                }
            }
            other => panic!("expected an ensemble outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_live_history() {
        let runner = runner(300);
        let model = trained(&runner, false).await;

        let short = runner.provider().fetch_quotes("600519", &DateRange::trailing(Local::now().date_naive(), 5)).await.unwrap();
        let series = SeriesNormalizer::normalize("600519", &short[..10], &[]).unwrap();
        let err = runner
            .predict_from_series(series, &model.best, None, model.feature_list(), 20)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientHistory { available: 10, required: 20, .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_schema_columns_align_to_zero() {
        let runner = runner(300);
        let model = trained(&runner, false).await;
        let mut schema = model.feature_list().to_vec();
        schema.pop();
        schema.push(FeatureName::sanitize("Close__not_extracted"));

        let series = SeriesNormalizer::normalize("600519", &quotes(300), &[]).unwrap();
        let result = runner.predict_from_series(series, &model.best, None, &schema, 20).unwrap();
        assert!(matches!(result.outcome, PredictionOutcome::Single(_)));
    }

    #[test]
    fn test_snapshot_falls_back_to_close_mean() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars: Vec<DailyBar> = (0..10)
            .map(|i| DailyBar {
                date: start + Duration::days(i),
                close: 10.0 + i as f64,
                ..Default::default()
            })
            .collect();
        let series = TimeSeries::new("600519", bars).unwrap();
        let snapshot = MarketSnapshot::from_series(&series).unwrap();

        assert_eq!(snapshot.ma20, 14.5);
        assert_eq!(snapshot.close, 19.0);
        assert_eq!(snapshot.status, Trend::Strong);
        assert!((snapshot.position_pct - (19.0 - 14.5) / 14.5 * 100.0).abs() < 1e-12);
    }
}
