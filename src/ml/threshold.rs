use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::metrics::{predict_labels, ClassMetrics, Confusion};

/// Objective maximized over the threshold grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMetric {
    /// Macro-averaged precision over both classes.
    #[default]
    Precision,
    /// Macro-averaged F1.
    F1,
    /// Mean of macro precision and macro recall.
    Balanced,
}

impl ThresholdMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdMetric::Precision => "precision",
            ThresholdMetric::F1 => "f1",
            ThresholdMetric::Balanced => "balanced",
        }
    }

    fn score(&self, strong: &ClassMetrics, weak: &ClassMetrics) -> f64 {
        let avg_precision = (strong.precision + weak.precision) / 2.0;
        match self {
            ThresholdMetric::Precision => avg_precision,
            ThresholdMetric::F1 => (strong.f1 + weak.f1) / 2.0,
            ThresholdMetric::Balanced => (avg_precision + (strong.recall + weak.recall) / 2.0) / 2.0,
        }
    }
}

impl fmt::Display for ThresholdMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "precision" => Ok(ThresholdMetric::Precision),
            "f1" => Ok(ThresholdMetric::F1),
            "balanced" => Ok(ThresholdMetric::Balanced),
            other => Err(format!("unknown threshold metric: {}", other)),
        }
    }
}

/// Candidate thresholds 0.10, 0.11, ... 0.94.
pub fn threshold_grid() -> impl Iterator<Item = f64> {
    (10..95).map(|k| k as f64 / 100.0)
}

/// Scan the grid and return `(threshold, score)` for the first threshold
/// achieving the maximum score. A candidate is skipped when either class's
/// recall falls below `min_recall`. When no candidate survives (or none
/// scores above zero) the result is `(0.5, 0.0)`.
pub fn find_threshold(
    y_true: &[u8],
    y_proba: &[f64],
    metric: ThresholdMetric,
    min_recall: f64,
) -> (f64, f64) {
    let mut best_threshold = 0.5;
    let mut best_score = 0.0;
    for threshold in threshold_grid() {
        let y_pred = predict_labels(y_proba, threshold);
        let confusion = Confusion::from_labels(y_true, &y_pred);
        let strong = confusion.class_metrics(0);
        let weak = confusion.class_metrics(1);
        if strong.recall.min(weak.recall) < min_recall {
            continue;
        }
        let score = metric.score(&strong, &weak);
        if score > best_score {
            best_score = score;
            best_threshold = threshold;
        }
    }
    (best_threshold, best_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_bounds() {
        let grid: Vec<f64> = threshold_grid().collect();
        assert_eq!(grid.len(), 85);
        assert!((grid[0] - 0.10).abs() < 1e-12);
        assert!((grid[84] - 0.94).abs() < 1e-12);
    }

    #[test]
    fn test_perfectly_separable_picks_lowest_maximizer() {
        let y_true = [0, 0, 1, 1];
        let proba = [0.2, 0.3, 0.7, 0.8];
        let (t, score) = find_threshold(&y_true, &proba, ThresholdMetric::Precision, 0.3);
        assert!((score - 1.0).abs() < 1e-12);
        // 0.31 is the first grid point above the highest strong probability.
        assert!((t - 0.31).abs() < 1e-9);
    }

    #[test]
    fn test_recall_floor_rejects_one_sided_thresholds() {
        // Any threshold above 0.4 drops weak recall to 1/3 and is rejected.
        let y_true = [0, 0, 0, 1, 1, 1];
        let proba = [0.05, 0.06, 0.07, 0.4, 0.9, 0.9];
        let (t, _) = find_threshold(&y_true, &proba, ThresholdMetric::Precision, 0.5);
        let y_pred = predict_labels(&proba, t);
        let c = Confusion::from_labels(&y_true, &y_pred);
        assert!(c.class_metrics(0).recall.min(c.class_metrics(1).recall) >= 0.5);
        assert!(t <= 0.4);
    }

    #[test]
    fn test_no_candidate_clears_floor_returns_default() {
        // Single-class truth: strong recall is 0 at every threshold.
        let (t, score) = find_threshold(&[1, 1], &[0.2, 0.8], ThresholdMetric::F1, 0.3);
        assert_eq!((t, score), (0.5, 0.0));
    }

    #[test]
    fn test_balanced_and_f1_scores() {
        let y_true = [0, 0, 1, 1];
        let proba = [0.2, 0.6, 0.7, 0.8];
        let (_, f1) = find_threshold(&y_true, &proba, ThresholdMetric::F1, 0.0);
        let (_, balanced) = find_threshold(&y_true, &proba, ThresholdMetric::Balanced, 0.0);
        assert!((f1 - 1.0).abs() < 1e-12);
        assert!((balanced - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("F1".parse::<ThresholdMetric>().unwrap(), ThresholdMetric::F1);
        assert!("recall".parse::<ThresholdMetric>().is_err());
    }
}
