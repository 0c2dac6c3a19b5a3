use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::trees::{GradientBoostedTrees, RandomForest};
use crate::error::TrainingError;
use crate::types::{FeatureName, FeatureVector};

/// Classifier families the trainer knows how to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    RandomForest,
    GradientBoosting,
    LeafwiseBoosting,
}

impl ModelFamily {
    /// Fit order; also the tie-break order for best-model election.
    pub const ALL: [ModelFamily; 3] = [
        ModelFamily::RandomForest,
        ModelFamily::GradientBoosting,
        ModelFamily::LeafwiseBoosting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::GradientBoosting => "gradient_boosting",
            ModelFamily::LeafwiseBoosting => "leafwise_boosting",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random_forest" => Ok(ModelFamily::RandomForest),
            "gradient_boosting" => Ok(ModelFamily::GradientBoosting),
            "leafwise_boosting" => Ok(ModelFamily::LeafwiseBoosting),
            other => Err(format!("unknown model family: {}", other)),
        }
    }
}

/// A fitted classifier of any family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedModel {
    Forest(RandomForest),
    Boosted(GradientBoostedTrees),
}

impl FittedModel {
    pub fn n_features(&self) -> usize {
        match self {
            FittedModel::Forest(m) => m.n_features(),
            FittedModel::Boosted(m) => m.n_features(),
        }
    }

    /// Probability of the weak class for one aligned row.
    pub fn predict_proba_row(&self, row: &[f64]) -> Result<f64, TrainingError> {
        match self {
            FittedModel::Forest(m) => m.predict_proba_row(row),
            FittedModel::Boosted(m) => m.predict_proba_row(row),
        }
    }

    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Vec<f64>, TrainingError> {
        if x.ncols() != self.n_features() {
            return Err(TrainingError::FeatureMismatch {
                expected: self.n_features(),
                actual: x.ncols(),
            });
        }
        x.rows()
            .into_iter()
            .map(|row| match row.as_slice() {
                Some(slice) => self.predict_proba_row(slice),
                None => self.predict_proba_row(&row.to_vec()),
            })
            .collect()
    }
}

/// One fitted family with its operating threshold and held-out scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub family: ModelFamily,
    pub model: FittedModel,
    pub threshold: f64,
    pub accuracy: f64,
    /// Mean of the two per-class precisions on the held-out split.
    pub avg_precision: f64,
    pub precision_strong: f64,
    pub precision_weak: f64,
}

impl ModelBundle {
    /// `(p_strong, p_weak)` for a vector already aligned to the model's schema.
    pub fn probabilities(&self, aligned: &FeatureVector) -> Result<(f64, f64), TrainingError> {
        let p_weak = self.model.predict_proba_row(aligned.values())?;
        Ok((1.0 - p_weak, p_weak))
    }
}

/// Index of the bundle with strictly highest averaged precision; earlier
/// bundles win ties.
pub fn select_best(bundles: &[ModelBundle]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, bundle) in bundles.iter().enumerate() {
        match best {
            Some(b) if bundle.avg_precision <= bundles[b].avg_precision => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Non-empty set of fitted families sharing one feature schema. Bundles are
/// kept in fit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    bundles: Vec<ModelBundle>,
    feature_list: Vec<FeatureName>,
}

impl Ensemble {
    /// Returns `None` for an empty bundle list.
    pub fn new(bundles: Vec<ModelBundle>, feature_list: Vec<FeatureName>) -> Option<Self> {
        if bundles.is_empty() {
            return None;
        }
        Some(Self { bundles, feature_list })
    }

    pub fn bundles(&self) -> &[ModelBundle] {
        &self.bundles
    }

    pub fn feature_list(&self) -> &[FeatureName] {
        &self.feature_list
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn get(&self, family: ModelFamily) -> Option<&ModelBundle> {
        self.bundles.iter().find(|b| b.family == family)
    }

    pub fn families(&self) -> Vec<ModelFamily> {
        self.bundles.iter().map(|b| b.family).collect()
    }

    pub fn best(&self) -> &ModelBundle {
        &self.bundles[select_best(&self.bundles).unwrap_or(0)]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ml::trees::ForestParams;
    use ndarray::array;

    pub(crate) fn tiny_forest() -> FittedModel {
        let x = array![[0.0, 1.0], [0.1, 1.0], [1.0, 0.0], [1.1, 0.0]];
        let params = ForestParams {
            n_trees: 5,
            bootstrap: false,
            ..Default::default()
        };
        FittedModel::Forest(RandomForest::fit(x.view(), &[0, 0, 1, 1], &params).unwrap())
    }

    pub(crate) fn bundle(family: ModelFamily, avg_precision: f64) -> ModelBundle {
        ModelBundle {
            family,
            model: tiny_forest(),
            threshold: 0.5,
            accuracy: 0.7,
            avg_precision,
            precision_strong: avg_precision,
            precision_weak: avg_precision,
        }
    }

    #[test]
    fn test_select_best_is_first_on_ties() {
        let bundles = vec![
            bundle(ModelFamily::RandomForest, 0.6),
            bundle(ModelFamily::GradientBoosting, 0.7),
            bundle(ModelFamily::LeafwiseBoosting, 0.7),
        ];
        assert_eq!(select_best(&bundles), Some(1));
        assert_eq!(select_best(&bundles), Some(1));
        assert_eq!(select_best(&[]), None);

        let zeros = vec![bundle(ModelFamily::RandomForest, 0.0), bundle(ModelFamily::GradientBoosting, 0.0)];
        assert_eq!(select_best(&zeros), Some(0));
    }

    #[test]
    fn test_ensemble_requires_bundles() {
        assert!(Ensemble::new(Vec::new(), vec!["a".into()]).is_none());
        let ensemble = Ensemble::new(vec![bundle(ModelFamily::RandomForest, 0.6)], vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(ensemble.len(), 1);
        assert_eq!(ensemble.best().family, ModelFamily::RandomForest);
        assert!(ensemble.get(ModelFamily::GradientBoosting).is_none());
    }

    #[test]
    fn test_bundle_probabilities_sum_to_one() {
        let b = bundle(ModelFamily::RandomForest, 0.6);
        let v = FeatureVector::from_pairs([("a", 1.05), ("b", 0.0)]);
        let (strong, weak) = b.probabilities(&v).unwrap();
        assert!((strong + weak - 1.0).abs() < 1e-12);
        assert!(weak > 0.5);
    }

    #[test]
    fn test_family_names_round_trip() {
        for family in ModelFamily::ALL {
            assert_eq!(family.as_str().parse::<ModelFamily>().unwrap(), family);
        }
    }
}
