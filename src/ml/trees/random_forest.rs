use ndarray::ArrayView2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::decision_tree::{DecisionTree, MaxFeatures, TreeParams};
use super::{check_width, validate_training_set};
use crate::error::TrainingError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub tree: TreeParams,
    pub bootstrap: bool,
    /// Sample weight applied to class 0 and class 1 respectively.
    pub class_weight: [f64; 2],
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            tree: TreeParams::default(),
            bootstrap: true,
            class_weight: [1.0, 1.0],
            seed: 42,
        }
    }
}

impl ForestParams {
    /// Shallow, heavily regularized forest that up-weights the weak class.
    pub fn weighted_classifier() -> Self {
        Self {
            n_trees: 1000,
            tree: TreeParams {
                max_depth: Some(10),
                min_samples_split: 20,
                min_samples_leaf: 10,
                max_features: MaxFeatures::Log2,
            },
            bootstrap: true,
            class_weight: [1.0, 2.5],
            seed: 42,
        }
    }
}

/// Bagged CART forest. Probabilities are the mean of per-tree leaf fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    feature_importances: Vec<f64>,
}

impl RandomForest {
    /// Trees are grown in parallel on the current rayon pool, each with its
    /// own generator seeded from `seed + tree_index`.
    pub fn fit(x: ArrayView2<'_, f64>, y: &[u8], params: &ForestParams) -> Result<Self, TrainingError> {
        validate_training_set(x, y)?;
        if params.n_trees == 0 {
            return Err(TrainingError::InvalidParameter("n_trees must be positive".into()));
        }

        let n = x.nrows();
        let weights: Vec<f64> = y.iter().map(|&l| params.class_weight[(l as usize).min(1)]).collect();

        let trees: Vec<DecisionTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(i as u64));
                let rows: Vec<usize> = if params.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                DecisionTree::fit_rows(x, y, &weights, rows, &params.tree, &mut rng)
            })
            .collect();

        let n_features = x.ncols();
        let mut feature_importances = vec![0.0; n_features];
        for tree in &trees {
            for (acc, imp) in feature_importances.iter_mut().zip(tree.feature_importances()) {
                *acc += imp;
            }
        }
        let sum: f64 = feature_importances.iter().sum();
        if sum > 0.0 {
            feature_importances.iter_mut().for_each(|v| *v /= sum);
        }

        Ok(Self {
            trees,
            n_features,
            feature_importances,
        })
    }

    pub fn predict_proba_row(&self, row: &[f64]) -> Result<f64, TrainingError> {
        check_width(self.n_features, row)?;
        if self.trees.is_empty() {
            return Ok(0.0);
        }
        let total: f64 = self.trees.iter().map(|t| t.predict_proba_row(row)).sum();
        Ok(total / self.trees.len() as f64)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Mean impurity-decrease importance per column, summing to 1.
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }
}
