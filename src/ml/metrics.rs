use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary confusion counts with class 1 as the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confusion {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
}

impl Confusion {
    pub fn from_labels(y_true: &[u8], y_pred: &[u8]) -> Self {
        let mut c = Confusion::default();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t == 1, p == 1) {
                (true, true) => c.tp += 1,
                (false, true) => c.fp += 1,
                (false, false) => c.tn += 1,
                (true, false) => c.fn_ += 1,
            }
        }
        c
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    /// Metrics for `class` (0 or 1). Undefined ratios are 0.
    pub fn class_metrics(&self, class: u8) -> ClassMetrics {
        let (tp, fp, fn_, support) = if class == 1 {
            (self.tp, self.fp, self.fn_, self.tp + self.fn_)
        } else {
            (self.tn, self.fn_, self.fp, self.tn + self.fp)
        };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ClassMetrics {
            precision,
            recall,
            f1,
            support,
        }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Held-out evaluation of one fitted model at its chosen threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub strong: ClassMetrics,
    pub weak: ClassMetrics,
    pub accuracy: f64,
}

impl ClassificationReport {
    pub fn new(y_true: &[u8], y_pred: &[u8]) -> Self {
        let confusion = Confusion::from_labels(y_true, y_pred);
        Self {
            strong: confusion.class_metrics(0),
            weak: confusion.class_metrics(1),
            accuracy: confusion.accuracy(),
        }
    }

    /// Unweighted mean of per-class precision.
    pub fn macro_precision(&self) -> f64 {
        (self.strong.precision + self.weak.precision) / 2.0
    }

    pub fn macro_recall(&self) -> f64 {
        (self.strong.recall + self.weak.recall) / 2.0
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>12} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        for (name, m) in [("strong", &self.strong), ("weak", &self.weak)] {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, m.precision, m.recall, m.f1, m.support
            )?;
        }
        let support = self.strong.support + self.weak.support;
        writeln!(f, "{:>12} {:>9} {:>9} {:>9.2} {:>9}", "accuracy", "", "", self.accuracy, support)?;
        write!(
            f,
            "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
            "macro avg",
            self.macro_precision(),
            self.macro_recall(),
            (self.strong.f1 + self.weak.f1) / 2.0,
            support
        )
    }
}

pub fn predict_labels(proba: &[f64], threshold: f64) -> Vec<u8> {
    proba.iter().map(|&p| u8::from(p >= threshold)).collect()
}
