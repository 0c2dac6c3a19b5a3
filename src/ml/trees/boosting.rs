use ndarray::ArrayView2;
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{check_width, sigmoid, traverse, validate_training_set, Node};
use crate::error::TrainingError;

/// Upper bound on histogram bins per feature.
const MAX_BINS: usize = 255;

/// Order in which leaves are expanded while growing a boosting tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthPolicy {
    /// Expand every splittable leaf level by level up to `max_depth`.
    DepthWise,
    /// Always expand the leaf with the largest gain, up to `max_leaves`.
    LeafWise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub max_leaves: Option<usize>,
    pub growth: GrowthPolicy,
    /// Fraction of rows drawn (without replacement) for each tree.
    pub subsample: f64,
    /// Fraction of columns drawn for each tree.
    pub colsample: f64,
    pub min_child_weight: f64,
    pub min_samples_leaf: usize,
    /// L2 penalty on leaf values.
    pub lambda: f64,
    pub class_weight: [f64; 2],
    /// Multiply positive weights by negatives/positives.
    pub balance_positive: bool,
    pub seed: u64,
}

impl BoostingParams {
    pub fn depth_wise() -> Self {
        Self {
            n_rounds: 500,
            learning_rate: 0.05,
            max_depth: 6,
            max_leaves: None,
            growth: GrowthPolicy::DepthWise,
            subsample: 0.8,
            colsample: 0.8,
            min_child_weight: 1.0,
            min_samples_leaf: 1,
            lambda: 1.0,
            class_weight: [1.0, 1.0],
            balance_positive: true,
            seed: 42,
        }
    }

    pub fn leaf_wise() -> Self {
        Self {
            n_rounds: 500,
            learning_rate: 0.05,
            max_depth: 6,
            max_leaves: Some(31),
            growth: GrowthPolicy::LeafWise,
            subsample: 0.8,
            colsample: 0.8,
            min_child_weight: 1e-3,
            min_samples_leaf: 20,
            lambda: 0.0,
            class_weight: [1.0, 2.5],
            balance_positive: false,
            seed: 42,
        }
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let invalid = |msg: &str| -> Result<(), TrainingError> { Err(TrainingError::InvalidParameter(msg.to_string())) };
        if self.n_rounds == 0 {
            return invalid("n_rounds must be positive");
        }
        if !(self.learning_rate > 0.0) {
            return invalid("learning_rate must be positive");
        }
        if self.max_depth == 0 {
            return invalid("max_depth must be positive");
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return invalid("subsample must be in (0, 1]");
        }
        if !(self.colsample > 0.0 && self.colsample <= 1.0) {
            return invalid("colsample must be in (0, 1]");
        }
        if self.lambda < 0.0 || self.min_child_weight < 0.0 {
            return invalid("lambda and min_child_weight must be non-negative");
        }
        if self.max_leaves.is_some_and(|l| l < 2) {
            return invalid("max_leaves must be at least 2");
        }
        Ok(())
    }
}

/// Binary logistic booster. Each tree is fit to the gradient and hessian of
/// the weighted log-loss on histogram-binned features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    base_score: f64,
    trees: Vec<Vec<Node>>,
    n_features: usize,
    growth: GrowthPolicy,
    feature_importances: Vec<f64>,
}

impl GradientBoostedTrees {
    pub fn fit(x: ArrayView2<'_, f64>, y: &[u8], params: &BoostingParams) -> Result<Self, TrainingError> {
        validate_training_set(x, y)?;
        params.validate()?;

        let n = x.nrows();
        let d = x.ncols();
        let positives = y.iter().filter(|&&l| l == 1).count() as f64;
        let negatives = n as f64 - positives;
        let pos_scale = if params.balance_positive { negatives / positives } else { 1.0 };
        let weights: Vec<f64> = y
            .iter()
            .map(|&l| {
                if l == 1 {
                    params.class_weight[1] * pos_scale
                } else {
                    params.class_weight[0]
                }
            })
            .collect();

        let total_weight: f64 = weights.iter().sum();
        let positive_weight: f64 = weights.iter().zip(y).filter(|&(_, &l)| l == 1).map(|(w, _)| w).sum();
        let p0 = (positive_weight / total_weight).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (p0 / (1.0 - p0)).ln();

        let binned = BinnedMatrix::build(x);
        let mut scores = vec![base_score; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut importances = vec![0.0; d];
        let mut trees = Vec::with_capacity(params.n_rounds);
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);

        let n_rows = ((n as f64 * params.subsample).ceil() as usize).clamp(1, n);
        let n_cols = ((d as f64 * params.colsample).round() as usize).clamp(1, d);

        for _ in 0..params.n_rounds {
            for i in 0..n {
                let p = sigmoid(scores[i]);
                let target = f64::from(y[i]);
                grad[i] = weights[i] * (p - target);
                hess[i] = (weights[i] * p * (1.0 - p)).max(1e-16);
            }

            let mut rows = if n_rows < n {
                index::sample(&mut rng, n, n_rows).into_vec()
            } else {
                (0..n).collect()
            };
            rows.sort_unstable();
            let mut cols = index::sample(&mut rng, d, n_cols).into_vec();
            cols.sort_unstable();

            let grower = TreeGrower {
                binned: &binned,
                grad: &grad,
                hess: &hess,
                cols: &cols,
                params,
            };
            let nodes = grower.grow(rows, &mut importances);

            for (i, score) in scores.iter_mut().enumerate() {
                *score += traverse(&nodes, &x.row(i));
            }
            trees.push(nodes);
        }

        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            importances.iter_mut().for_each(|v| *v /= sum);
        }

        Ok(Self {
            base_score,
            trees,
            n_features: d,
            growth: params.growth,
            feature_importances: importances,
        })
    }

    pub fn predict_proba_row(&self, row: &[f64]) -> Result<f64, TrainingError> {
        check_width(self.n_features, row)?;
        let margin: f64 = self.base_score + self.trees.iter().map(|t| traverse(t, row)).sum::<f64>();
        Ok(sigmoid(margin))
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn growth(&self) -> GrowthPolicy {
        self.growth
    }

    /// Total split gain per column, summing to 1.
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }
}

/// Column-wise quantile bins. A value falls into bin `b` when
/// `cuts[b - 1] < value <= cuts[b]`, so a split after bin `b` is exactly
/// `value <= cuts[b]` on raw data.
struct BinnedMatrix {
    bins: Vec<u8>,
    cuts: Vec<Vec<f64>>,
    n_cols: usize,
}

impl BinnedMatrix {
    fn build(x: ArrayView2<'_, f64>) -> Self {
        let (n, d) = x.dim();
        let mut cuts = Vec::with_capacity(d);
        for col in x.columns() {
            let mut unique: Vec<f64> = col.to_vec();
            unique.sort_by(|a, b| a.total_cmp(b));
            unique.dedup();

            let mut col_cuts = Vec::new();
            if unique.len() <= MAX_BINS {
                col_cuts.extend(unique.windows(2).map(|w| w[0] + (w[1] - w[0]) / 2.0));
            } else {
                for k in 1..MAX_BINS {
                    let idx = k * unique.len() / MAX_BINS;
                    col_cuts.push(unique[idx - 1] + (unique[idx] - unique[idx - 1]) / 2.0);
                }
                col_cuts.dedup();
            }
            cuts.push(col_cuts);
        }

        let mut bins = vec![0u8; n * d];
        for i in 0..n {
            for j in 0..d {
                let v = x[[i, j]];
                bins[i * d + j] = cuts[j].partition_point(|&c| c < v) as u8;
            }
        }
        Self { bins, cuts, n_cols: d }
    }

    fn bin(&self, row: usize, col: usize) -> usize {
        self.bins[row * self.n_cols + col] as usize
    }
}

struct GainSplit {
    feature: usize,
    bin: usize,
    threshold: f64,
    gain: f64,
}

struct OpenLeaf {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    split: GainSplit,
}

struct TreeGrower<'a> {
    binned: &'a BinnedMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    cols: &'a [usize],
    params: &'a BoostingParams,
}

impl TreeGrower<'_> {
    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(g, h), &r| (g + self.grad[r], h + self.hess[r]))
    }

    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda;
        if denom <= 0.0 {
            0.0
        } else {
            -g / denom * self.params.learning_rate
        }
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda;
        if denom <= 0.0 {
            0.0
        } else {
            g * g / denom
        }
    }

    fn grow(&self, rows: Vec<usize>, importances: &mut [f64]) -> Vec<Node> {
        let (g, h) = self.sums(&rows);
        let mut nodes = vec![Node::Leaf {
            value: self.leaf_value(g, h),
        }];
        let mut open = Vec::new();
        self.open_leaf(&mut open, 0, rows, 0);
        let mut n_leaves = 1;

        loop {
            if let Some(max_leaves) = self.params.max_leaves {
                if n_leaves >= max_leaves {
                    break;
                }
            }
            let pick = match self.params.growth {
                GrowthPolicy::DepthWise => (!open.is_empty()).then_some(0),
                GrowthPolicy::LeafWise => open
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.split.gain.total_cmp(&b.1.split.gain))
                    .map(|(i, _)| i),
            };
            let Some(pick) = pick else {
                break;
            };
            let leaf = open.remove(pick);
            let split = leaf.split;
            importances[split.feature] += split.gain;

            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = leaf
                .rows
                .into_iter()
                .partition(|&r| self.binned.bin(r, split.feature) <= split.bin);

            let (lg, lh) = self.sums(&left_rows);
            let (rg, rh) = self.sums(&right_rows);
            let left = nodes.len();
            nodes.push(Node::Leaf {
                value: self.leaf_value(lg, lh),
            });
            let right = nodes.len();
            nodes.push(Node::Leaf {
                value: self.leaf_value(rg, rh),
            });
            nodes[leaf.node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            n_leaves += 1;

            self.open_leaf(&mut open, left, left_rows, leaf.depth + 1);
            self.open_leaf(&mut open, right, right_rows, leaf.depth + 1);
        }
        nodes
    }

    fn open_leaf(&self, open: &mut Vec<OpenLeaf>, node: usize, rows: Vec<usize>, depth: usize) {
        if depth >= self.params.max_depth {
            return;
        }
        if let Some(split) = self.best_split(&rows) {
            open.push(OpenLeaf {
                node,
                rows,
                depth,
                split,
            });
        }
    }

    fn best_split(&self, rows: &[usize]) -> Option<GainSplit> {
        let min_leaf = self.params.min_samples_leaf.max(1);
        if rows.len() < 2 * min_leaf {
            return None;
        }
        let (g, h) = self.sums(rows);
        let parent = self.score(g, h);

        let mut best: Option<GainSplit> = None;
        for &col in self.cols {
            let cuts = &self.binned.cuts[col];
            if cuts.is_empty() {
                continue;
            }
            let mut hist = vec![(0.0f64, 0.0f64, 0usize); cuts.len() + 1];
            for &r in rows {
                let slot = &mut hist[self.binned.bin(r, col)];
                slot.0 += self.grad[r];
                slot.1 += self.hess[r];
                slot.2 += 1;
            }

            let (mut gl, mut hl, mut cl) = (0.0, 0.0, 0usize);
            for (b, &(bg, bh, bc)) in hist.iter().enumerate().take(cuts.len()) {
                gl += bg;
                hl += bh;
                cl += bc;
                let cr = rows.len() - cl;
                if cl < min_leaf || cr < min_leaf {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }
                let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent);
                if gain > best.as_ref().map_or(1e-12, |s| s.gain + 1e-12) {
                    best = Some(GainSplit {
                        feature: col,
                        bin: b,
                        threshold: cuts[b],
                        gain,
                    });
                }
            }
        }
        best
    }
}
