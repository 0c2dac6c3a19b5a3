use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TrainingError;
use crate::ml::align::align_frame;
use crate::ml::metrics::{predict_labels, ClassificationReport};
use crate::ml::model::{select_best, Ensemble, FittedModel, ModelBundle, ModelFamily};
use crate::ml::resample::SmoteTomek;
use crate::ml::threshold::{find_threshold, ThresholdMetric};
use crate::ml::trees::{BoostingParams, ForestParams, GradientBoostedTrees, RandomForest};
use crate::types::{FeatureFrame, FeatureName, Trend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerSettings {
    /// Rebalance the training split with SMOTE + Tomek links.
    pub resample: bool,
    pub smote_neighbors: usize,
    pub resample_seed: u64,
    pub threshold_metric: ThresholdMetric,
    pub min_recall: f64,
    pub random_forest: ForestParams,
    pub gradient_boosting: BoostingParams,
    pub leafwise_boosting: BoostingParams,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            resample: true,
            smote_neighbors: 5,
            resample_seed: 42,
            threshold_metric: ThresholdMetric::Precision,
            min_recall: 0.3,
            random_forest: ForestParams::weighted_classifier(),
            gradient_boosting: BoostingParams::depth_wise(),
            leafwise_boosting: BoostingParams::leaf_wise(),
        }
    }
}

/// A family that could not be fitted or evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyFailure {
    pub family: ModelFamily,
    pub error: TrainingError,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub best: ModelBundle,
    pub ensemble: Ensemble,
    pub failures: Vec<FamilyFailure>,
    /// Held-out report of the best bundle at its threshold.
    pub report: ClassificationReport,
    pub train_rows: usize,
}

impl TrainingOutcome {
    pub fn feature_list(&self) -> &[FeatureName] {
        self.ensemble.feature_list()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnsembleTrainer {
    settings: TrainerSettings,
}

impl EnsembleTrainer {
    pub fn new(settings: TrainerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Fit every requested family on the training split and score it on the
    /// held-out split. Only a run where no family fits is an error.
    pub fn train(
        &self,
        train: &FeatureFrame,
        test: &FeatureFrame,
        y_train: &[Trend],
        y_test: &[Trend],
        use_multi_models: bool,
    ) -> Result<TrainingOutcome, TrainingError> {
        if train.n_rows() == 0 || y_train.is_empty() {
            return Err(TrainingError::EmptyTrainingSet);
        }
        if test.n_rows() == 0 || y_test.is_empty() {
            return Err(TrainingError::EmptyTestSet);
        }

        let train = train.clone().sanitized();
        let feature_list = train.columns().to_vec();
        let test = align_frame(&test.clone().sanitized(), &feature_list);

        let y_train: Vec<u8> = y_train.iter().map(|l| l.label()).collect();
        let y_test: Vec<u8> = y_test.iter().map(|l| l.label()).collect();
        let (x_fit, y_fit) = self.rebalance(train.values(), &y_train);

        let n_families = if use_multi_models { ModelFamily::ALL.len() } else { 1 };

        let mut bundles = Vec::new();
        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for &family in ModelFamily::ALL.iter().take(n_families) {
            info!("Training {} on {} rows x {} features", family, x_fit.nrows(), x_fit.ncols());
            let fitted = self
                .fit_family(family, &x_fit, &y_fit)
                .and_then(|model| self.evaluate(family, model, test.values(), &y_test));
            match fitted {
                Ok((bundle, report)) => {
                    info!(
                        "{}: threshold={:.2} accuracy={:.4} avg_precision={:.4}",
                        family, bundle.threshold, bundle.accuracy, bundle.avg_precision
                    );
                    bundles.push(bundle);
                    reports.push(report);
                }
                Err(error) => {
                    warn!("{} failed to train: {}", family, error);
                    failures.push(FamilyFailure { family, error });
                }
            }
        }

        let best_idx = select_best(&bundles).ok_or(TrainingError::NoModelFitted)?;
        let best = bundles[best_idx].clone();
        let report = reports.swap_remove(best_idx);
        info!("Best model: {} (avg precision {:.4})", best.family, best.avg_precision);
        debug!("Held-out report for {}:\n{}", best.family, report);

        let ensemble = Ensemble::new(bundles, feature_list).ok_or(TrainingError::NoModelFitted)?;
        Ok(TrainingOutcome {
            best,
            ensemble,
            failures,
            report,
            train_rows: y_fit.len(),
        })
    }

    fn rebalance(&self, x: &Array2<f64>, y: &[u8]) -> (Array2<f64>, Vec<u8>) {
        if !self.settings.resample {
            return (x.clone(), y.to_vec());
        }
        let sampler = SmoteTomek::new(self.settings.smote_neighbors, self.settings.resample_seed);
        match sampler.resample(x.view(), y) {
            Ok((x_res, y_res)) => {
                let weak = y_res.iter().filter(|&&l| l == 1).count();
                info!("Resampled training split: {} rows ({} weak, {} strong)", y_res.len(), weak, y_res.len() - weak);
                (x_res, y_res)
            }
            Err(e) => {
                warn!("Resampling failed, training on the raw split: {}", e);
                (x.clone(), y.to_vec())
            }
        }
    }

    fn fit_family(&self, family: ModelFamily, x: &Array2<f64>, y: &[u8]) -> Result<FittedModel, TrainingError> {
        match family {
            ModelFamily::RandomForest => {
                RandomForest::fit(x.view(), y, &self.settings.random_forest).map(FittedModel::Forest)
            }
            ModelFamily::GradientBoosting => {
                GradientBoostedTrees::fit(x.view(), y, &self.settings.gradient_boosting).map(FittedModel::Boosted)
            }
            ModelFamily::LeafwiseBoosting => {
                GradientBoostedTrees::fit(x.view(), y, &self.settings.leafwise_boosting).map(FittedModel::Boosted)
            }
        }
    }

    fn evaluate(
        &self,
        family: ModelFamily,
        model: FittedModel,
        x_test: &Array2<f64>,
        y_test: &[u8],
    ) -> Result<(ModelBundle, ClassificationReport), TrainingError> {
        let proba = model.predict_proba(x_test.view())?;
        let (threshold, score) =
            find_threshold(y_test, &proba, self.settings.threshold_metric, self.settings.min_recall);
        debug!("{}: best {} score {:.4} at threshold {:.2}", family, self.settings.threshold_metric, score, threshold);

        let report = ClassificationReport::new(y_test, &predict_labels(&proba, threshold));
        let bundle = ModelBundle {
            family,
            model,
            threshold,
            accuracy: report.accuracy,
            avg_precision: report.macro_precision(),
            precision_strong: report.strong.precision,
            precision_weak: report.weak.precision,
        };
        Ok((bundle, report))
    }
}
