use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, info, warn};

use super::trees::{ForestParams, RandomForest};
use crate::error::SelectionError;
use crate::types::{FeatureFrame, Trend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSettings {
    /// False discovery rate budget for the relevance filter.
    pub fdr_level: f64,
    /// Benjamini-Hochberg when true, Benjamini-Yekutieli otherwise.
    pub hypotheses_independent: bool,
    /// Importance pruning only runs above this many features.
    pub prune_above: usize,
    pub importance_share: f64,
    pub forest_trees: usize,
    pub seed: u64,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            fdr_level: 0.01,
            hypotheses_independent: false,
            prune_above: 100,
            importance_share: 0.95,
            forest_trees: 100,
            seed: 42,
        }
    }
}

/// What selection kept and why.
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub frame: FeatureFrame,
    /// Set when the relevance filter could not run and passed everything through.
    pub fallback: Option<SelectionError>,
    pub relevant: usize,
    pub pruned: bool,
}

/// Two-stage reduction: a Mann-Whitney relevance filter under FDR control,
/// then random-forest importance pruning on wide results.
#[derive(Debug, Clone, Default)]
pub struct FeatureSelector {
    settings: SelectionSettings,
}

impl FeatureSelector {
    pub fn new(settings: SelectionSettings) -> Self {
        Self { settings }
    }

    pub fn select(&self, frame: &FeatureFrame, labels: &[Trend]) -> SelectionOutcome {
        let (filtered, fallback) = match self.relevant_columns(frame, labels) {
            Ok(keep) => (frame.select_columns(&keep), None),
            Err(e) => {
                warn!("Relevance filter skipped, keeping all {} features: {}", frame.n_cols(), e);
                (frame.clone(), Some(e))
            }
        };
        let relevant = filtered.n_cols();
        info!("Relevance filter kept {}/{} features", relevant, frame.n_cols());

        if relevant <= self.settings.prune_above {
            return SelectionOutcome {
                frame: filtered,
                fallback,
                relevant,
                pruned: false,
            };
        }

        match self.prune_by_importance(&filtered, labels) {
            Ok(keep) => {
                info!("Importance pruning kept {}/{} features", keep.len(), relevant);
                SelectionOutcome {
                    frame: filtered.select_columns(&keep),
                    fallback,
                    relevant,
                    pruned: true,
                }
            }
            Err(e) => {
                warn!("Importance pruning skipped: {}", e);
                SelectionOutcome {
                    frame: filtered,
                    fallback,
                    relevant,
                    pruned: false,
                }
            }
        }
    }

    /// Indices of columns that pass the FDR-controlled significance test.
    pub fn relevant_columns(&self, frame: &FeatureFrame, labels: &[Trend]) -> Result<Vec<usize>, SelectionError> {
        if frame.n_cols() == 0 || frame.n_rows() == 0 {
            return Err(SelectionError::EmptyFrame);
        }
        if frame.n_rows() != labels.len() {
            return Err(SelectionError::LengthMismatch {
                rows: frame.n_rows(),
                labels: labels.len(),
            });
        }
        let weak = labels.iter().filter(|&&l| l == Trend::Weak).count();
        if weak == 0 || weak == labels.len() {
            return Err(SelectionError::SingleClass);
        }

        let normal = Normal::new(0.0, 1.0).map_err(|e| SelectionError::Statistics(e.to_string()))?;
        let p_values: Vec<f64> = (0..frame.n_cols())
            .map(|j| {
                let column = frame.column(j);
                let (weak_values, strong_values): (Vec<f64>, Vec<f64>) = {
                    let mut w = Vec::with_capacity(weak);
                    let mut s = Vec::with_capacity(labels.len() - weak);
                    for (v, label) in column.iter().zip(labels) {
                        match label {
                            Trend::Weak => w.push(*v),
                            Trend::Strong => s.push(*v),
                        }
                    }
                    (w, s)
                };
                mann_whitney_p(&weak_values, &strong_values, &normal)
            })
            .collect();

        let keep = fdr_reject(&p_values, self.settings.fdr_level, self.settings.hypotheses_independent);
        debug!("{} of {} hypotheses rejected at fdr {}", keep.len(), p_values.len(), self.settings.fdr_level);
        if keep.is_empty() {
            return Err(SelectionError::NothingRelevant);
        }
        Ok(keep)
    }

    fn prune_by_importance(&self, frame: &FeatureFrame, labels: &[Trend]) -> Result<Vec<usize>, SelectionError> {
        let y: Vec<u8> = labels.iter().map(|l| l.label()).collect();
        let params = ForestParams {
            n_trees: self.settings.forest_trees,
            seed: self.settings.seed,
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(frame.values().view(), &y, &params)
            .map_err(|e| SelectionError::Statistics(e.to_string()))?;
        Ok(importance_prefix(forest.feature_importances(), self.settings.importance_share))
    }
}

/// Two-sided Mann-Whitney U p-value using the normal approximation with tie
/// and continuity corrections. Inputs with zero rank variance get p = 1.
pub fn mann_whitney_p(x: &[f64], y: &[f64], normal: &Normal) -> f64 {
    let (n1, n2) = (x.len(), y.len());
    if n1 == 0 || n2 == 0 {
        return 1.0;
    }
    let n = n1 + n2;

    let mut pooled: Vec<(f64, bool)> = x.iter().map(|&v| (v, true)).chain(y.iter().map(|&v| (v, false))).collect();
    pooled.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut rank_sum_x = 0.0;
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && pooled[j + 1].0 == pooled[i].0 {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        let t = (j - i + 1) as f64;
        tie_term += t * t * t - t;
        rank_sum_x += pooled[i..=j].iter().filter(|(_, in_x)| *in_x).count() as f64 * avg_rank;
        i = j + 1;
    }

    let (n1f, n2f, nf) = (n1 as f64, n2 as f64, n as f64);
    let u1 = rank_sum_x - n1f * (n1f + 1.0) / 2.0;
    let u = u1.max(n1f * n2f - u1);
    let mu = n1f * n2f / 2.0;
    let sigma = (n1f * n2f / 12.0 * ((nf + 1.0) - tie_term / (nf * (nf - 1.0)))).sqrt();
    if !(sigma > 0.0) {
        return 1.0;
    }
    let z = (u - mu - 0.5) / sigma;
    (2.0 * normal.sf(z)).clamp(0.0, 1.0)
}

/// Step-up FDR procedure. Returns the indices (in original order) of the
/// rejected hypotheses.
pub fn fdr_reject(p_values: &[f64], level: f64, independent: bool) -> Vec<usize> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }
    let c_m = if independent {
        1.0
    } else {
        (1..=m).map(|i| 1.0 / i as f64).sum()
    };

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let cutoff = order
        .iter()
        .enumerate()
        .filter(|&(rank, &idx)| p_values[idx] <= (rank + 1) as f64 / (m as f64 * c_m) * level)
        .map(|(rank, _)| rank + 1)
        .last();

    let mut rejected: Vec<usize> = match cutoff {
        Some(k) => order[..k].to_vec(),
        None => Vec::new(),
    };
    rejected.sort_unstable();
    rejected
}

/// Indices of the top-ranked features: rank by importance descending (stable)
/// and keep `count(cumulative share <= share) + 1` of them.
pub fn importance_prefix(importances: &[f64], share: f64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..importances.len()).collect();
    order.sort_by(|&a, &b| importances[b].total_cmp(&importances[a]));

    let mut cumulative = 0.0;
    let within = order
        .iter()
        .take_while(|&&j| {
            cumulative += importances[j];
            cumulative <= share
        })
        .count();
    let n = (within + 1).min(order.len());

    let mut keep = order[..n].to_vec();
    keep.sort_unstable();
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn planted_frame(n: usize, noise_cols: usize) -> (FeatureFrame, Vec<Trend>) {
        let mut values = Vec::with_capacity(n * (noise_cols + 1));
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let weak = i % 2 == 0;
            labels.push(if weak { Trend::Weak } else { Trend::Strong });
            values.push(if weak { 10.0 } else { 0.0 } + (i % 7) as f64);
            for k in 0..noise_cols {
                values.push(((i * (k + 3) * 31) % 17) as f64);
            }
        }
        let ids = (0..n).map(|i| format!("t_{}", i)).collect();
        let mut columns = vec!["signal".into()];
        columns.extend((0..noise_cols).map(|k| format!("noise_{}", k).into()));
        let frame = FeatureFrame::new(ids, columns, Array2::from_shape_vec((n, noise_cols + 1), values).unwrap()).unwrap();
        (frame, labels)
    }

    #[test]
    fn test_mann_whitney_matches_reference() {
        let normal = Normal::new(0.0, 1.0).unwrap();
        // scipy.stats.mannwhitneyu([1,2,3,4,5], [6,7,8,9,10], method="asymptotic") -> p ~= 0.01219
        let p = mann_whitney_p(&[1.0, 2.0, 3.0, 4.0, 5.0], &[6.0, 7.0, 8.0, 9.0, 10.0], &normal);
        assert!((p - 0.01219).abs() < 1e-4, "p = {p}");
        assert_eq!(mann_whitney_p(&[1.0, 1.0], &[1.0, 1.0], &normal), 1.0);
    }

    #[test]
    fn test_fdr_procedures() {
        let p = [0.001, 0.009, 0.039, 0.041, 0.9];
        assert_eq!(fdr_reject(&p, 0.05, true), vec![0, 1]);
        // BY divides by sum(1/i) = 2.283 for m = 5.
        assert_eq!(fdr_reject(&p, 0.05, false), vec![0]);
        assert!(fdr_reject(&[0.5, 0.7], 0.05, true).is_empty());
    }

    #[test]
    fn test_importance_prefix_adds_headroom() {
        let imp = [0.04, 0.6, 0.3, 0.06];
        // Sorted 0.6, 0.3 (0.9 <= 0.95), then 0.06 pushes past: keep 2 + 1.
        assert_eq!(importance_prefix(&imp, 0.95), vec![1, 2, 3]);
        assert_eq!(importance_prefix(&[1.0], 0.95), vec![0]);
    }

    #[test]
    fn test_select_keeps_planted_signal() {
        let (frame, labels) = planted_frame(200, 3);
        let outcome = FeatureSelector::default().select(&frame, &labels);
        assert!(outcome.fallback.is_none());
        assert!(!outcome.pruned);
        assert_eq!(outcome.frame.columns()[0].as_str(), "signal");
    }

    #[test]
    fn test_single_class_falls_back_to_passthrough() {
        let (frame, _) = planted_frame(20, 2);
        let labels = vec![Trend::Strong; 20];
        let outcome = FeatureSelector::default().select(&frame, &labels);
        assert_eq!(outcome.fallback, Some(SelectionError::SingleClass));
        assert_eq!(outcome.frame.n_cols(), 3);
    }

    #[test]
    fn test_wide_frame_is_pruned() {
        let (frame, labels) = planted_frame(120, 3);
        let settings = SelectionSettings {
            fdr_level: 1.0,
            hypotheses_independent: true,
            prune_above: 2,
            forest_trees: 20,
            ..Default::default()
        };
        let outcome = FeatureSelector::new(settings).select(&frame, &labels);
        assert!(outcome.pruned);
        assert!(outcome.frame.n_cols() <= outcome.relevant);
        assert!(outcome.frame.columns().iter().any(|c| c.as_str() == "signal"));
    }
}
