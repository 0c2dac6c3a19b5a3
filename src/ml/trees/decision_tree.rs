use ndarray::ArrayView2;
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{traverse, validate_training_set, Node};
use crate::error::TrainingError;

/// How many candidate features each split considers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    All,
    Sqrt,
    Log2,
    Fraction(f64),
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => n.sqrt() as usize,
            MaxFeatures::Log2 => n.log2() as usize,
            MaxFeatures::Fraction(f) => (n * f) as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
        }
    }
}

/// Binary CART classifier with weighted Gini impurity. Leaves hold the
/// weighted fraction of class 1 among the samples that reached them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_features: usize,
    importances: Vec<f64>,
}

impl DecisionTree {
    /// Fit on every row with unit weights.
    pub fn fit(x: ArrayView2<'_, f64>, y: &[u8], params: &TreeParams, seed: u64) -> Result<Self, TrainingError> {
        validate_training_set(x, y)?;
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let weights = vec![1.0; x.nrows()];
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Ok(Self::fit_rows(x, y, &weights, rows, params, &mut rng))
    }

    /// Fit on a (possibly repeated) subset of rows. Inputs are assumed
    /// validated by the caller.
    pub(crate) fn fit_rows(
        x: ArrayView2<'_, f64>,
        y: &[u8],
        weights: &[f64],
        rows: Vec<usize>,
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let n_features = x.ncols();
        let total_weight: f64 = rows.iter().map(|&r| weights[r]).sum();
        let mut builder = Builder {
            x,
            y,
            weights,
            params,
            n_try: params.max_features.resolve(n_features),
            rng,
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
        };
        builder.grow(rows, 0);

        let mut importances = builder.importances;
        let sum: f64 = importances.iter().sum();
        if sum > 0.0 && total_weight > 0.0 {
            importances.iter_mut().for_each(|v| *v /= sum);
        }

        Self {
            nodes: builder.nodes,
            n_features,
            importances,
        }
    }

    /// Probability of class 1 for one row.
    pub fn predict_proba_row(&self, row: &[f64]) -> f64 {
        traverse(&self.nodes, row)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Impurity-decrease importances, normalized to sum to 1 (all zero for a stump).
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Builder<'x, 'a, 'r> {
    x: ArrayView2<'x, f64>,
    y: &'a [u8],
    weights: &'a [f64],
    params: &'a TreeParams,
    n_try: usize,
    rng: &'r mut ChaCha8Rng,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl Builder<'_, '_, '_> {
    fn class_weights(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(w0, w1), &r| {
            if self.y[r] == 1 {
                (w0, w1 + self.weights[r])
            } else {
                (w0 + self.weights[r], w1)
            }
        })
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let (w0, w1) = self.class_weights(&rows);
        let total = w0 + w1;
        let idx = self.nodes.len();
        let value = if total > 0.0 { w1 / total } else { 0.0 };
        self.nodes.push(Node::Leaf { value });

        let depth_reached = self.params.max_depth.is_some_and(|d| depth >= d);
        if depth_reached || rows.len() < self.params.min_samples_split || w0 == 0.0 || w1 == 0.0 {
            return idx;
        }

        let Some(split) = self.best_split(&rows, w0, w1) else {
            return idx;
        };

        self.importances[split.feature] += total * split.gain;
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.x[[r, split.feature]] <= split.threshold);

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    fn best_split(&mut self, rows: &[usize], w0: f64, w1: f64) -> Option<SplitCandidate> {
        let total = w0 + w1;
        let parent = gini(w0, w1);
        let min_leaf = self.params.min_samples_leaf.max(1);
        let n = rows.len();
        let candidates = index::sample(&mut *self.rng, self.x.ncols(), self.n_try);

        let mut best: Option<SplitCandidate> = None;
        let mut sorted: Vec<(f64, usize)> = Vec::with_capacity(n);
        for feature in candidates.iter() {
            sorted.clear();
            sorted.extend(rows.iter().map(|&r| (self.x[[r, feature]], r)));
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let (mut lw0, mut lw1) = (0.0, 0.0);
            for i in 0..n - 1 {
                let (value, row) = sorted[i];
                if self.y[row] == 1 {
                    lw1 += self.weights[row];
                } else {
                    lw0 += self.weights[row];
                }
                let next = sorted[i + 1].0;
                if value >= next {
                    continue;
                }
                let left_count = i + 1;
                if left_count < min_leaf || n - left_count < min_leaf {
                    continue;
                }

                let lw = lw0 + lw1;
                let (rw0, rw1) = (w0 - lw0, w1 - lw1);
                let rw = rw0 + rw1;
                if lw <= 0.0 || rw <= 0.0 {
                    continue;
                }
                let child = (lw * gini(lw0, lw1) + rw * gini(rw0, rw1)) / total;
                let gain = parent - child;
                if gain > best.as_ref().map_or(1e-12, |b| b.gain + 1e-12) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: midpoint(value, next),
                        gain,
                    });
                }
            }
        }
        best
    }
}

fn gini(w0: f64, w1: f64) -> f64 {
    let total = w0 + w1;
    if total <= 0.0 {
        return 0.0;
    }
    let (p0, p1) = (w0 / total, w1 / total);
    1.0 - p0 * p0 - p1 * p1
}

/// Midpoint that stays strictly below `hi` so `lo` always goes left.
fn midpoint(lo: f64, hi: f64) -> f64 {
    let mid = lo + (hi - lo) / 2.0;
    if mid >= hi {
        lo
    } else {
        mid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_tree_separates_threshold_feature() {
        let x = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0], [10.0, 5.0], [11.0, 5.0], [12.0, 5.0]];
        let y = [0, 0, 0, 1, 1, 1];
        let params = TreeParams {
            max_features: MaxFeatures::All,
            ..Default::default()
        };
        let tree = DecisionTree::fit(x.view(), &y, &params, 42).unwrap();

        assert_eq!(tree.predict_proba_row(&[2.5, 5.0]), 0.0);
        assert_eq!(tree.predict_proba_row(&[11.5, 5.0]), 1.0);
        assert_eq!(tree.depth(), 1);
        assert!((tree.feature_importances()[0] - 1.0).abs() < 1e-12);
        assert_eq!(tree.feature_importances()[1], 0.0);
    }

    #[test]
    fn test_tree_respects_max_depth_and_min_leaf() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        let y = [0, 1, 0, 1, 0, 1, 0, 1];
        let params = TreeParams {
            max_depth: Some(2),
            min_samples_leaf: 2,
            max_features: MaxFeatures::All,
            ..Default::default()
        };
        let tree = DecisionTree::fit(x.view(), &y, &params, 7).unwrap();
        assert!(tree.depth() <= 2);
        for v in 1..=8 {
            let p = tree.predict_proba_row(&[v as f64]);
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_tree_rejects_single_class_and_nan() {
        let x = array![[1.0], [2.0]];
        assert_eq!(
            DecisionTree::fit(x.view(), &[1, 1], &TreeParams::default(), 0).unwrap_err(),
            TrainingError::SingleClass
        );
        let bad = array![[f64::NAN], [2.0]];
        assert_eq!(
            DecisionTree::fit(bad.view(), &[0, 1], &TreeParams::default(), 0).unwrap_err(),
            TrainingError::NonFiniteFeatures
        );
    }

    #[test]
    fn test_max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(100), 10);
        assert_eq!(MaxFeatures::Log2.resolve(100), 6);
        assert_eq!(MaxFeatures::All.resolve(7), 7);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(9), 4);
    }
}
