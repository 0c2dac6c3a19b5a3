//! Tree ensembles used by the trainer: a bagged CART forest and two
//! second-order gradient boosters that differ only in how they grow trees.

pub mod boosting;
pub mod decision_tree;
pub mod random_forest;

pub use boosting::{BoostingParams, GradientBoostedTrees, GrowthPolicy};
pub use decision_tree::{DecisionTree, MaxFeatures, TreeParams};
pub use random_forest::{ForestParams, RandomForest};

use ndarray::ArrayView2;
use std::ops::Index;
use serde::{Deserialize, Serialize};

use crate::error::TrainingError;

/// Flat tree node. Children are indices into the owning tree's node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Walk from the root to a leaf. Rows go left when `row[feature] <= threshold`.
pub(crate) fn traverse<R>(nodes: &[Node], row: &R) -> f64
where
    R: Index<usize, Output = f64> + ?Sized,
{
    let mut idx = 0;
    loop {
        match nodes.get(idx) {
            Some(Node::Leaf { value }) => return *value,
            Some(Node::Split {
                feature,
                threshold,
                left,
                right,
            }) => {
                idx = if row[*feature] <= *threshold { *left } else { *right };
            }
            None => return 0.0,
        }
    }
}

/// Checks shared by every learner before fitting.
pub(crate) fn validate_training_set(x: ArrayView2<'_, f64>, y: &[u8]) -> Result<(), TrainingError> {
    if x.nrows() == 0 || x.ncols() == 0 || y.is_empty() {
        return Err(TrainingError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(TrainingError::FeatureMismatch {
            expected: x.nrows(),
            actual: y.len(),
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(TrainingError::NonFiniteFeatures);
    }
    let positives = y.iter().filter(|&&l| l == 1).count();
    if positives == 0 || positives == y.len() {
        return Err(TrainingError::SingleClass);
    }
    Ok(())
}

pub(crate) fn check_width(expected: usize, row: &[f64]) -> Result<(), TrainingError> {
    if row.len() != expected {
        return Err(TrainingError::FeatureMismatch {
            expected,
            actual: row.len(),
        });
    }
    Ok(())
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
