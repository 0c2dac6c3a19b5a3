use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::error::TrainingError;
use crate::ml::model::{Ensemble, ModelBundle, ModelFamily};
use crate::types::{FeatureVector, Trend};

/// How much to trust a single probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceRating {
    VeryHigh,
    High,
    Medium,
    Low,
}

impl ConfidenceRating {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            ConfidenceRating::VeryHigh
        } else if confidence >= 0.7 {
            ConfidenceRating::High
        } else if confidence >= 0.6 {
            ConfidenceRating::Medium
        } else {
            ConfidenceRating::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceRating::VeryHigh => "very high",
            ConfidenceRating::High => "high",
            ConfidenceRating::Medium => "medium",
            ConfidenceRating::Low => "low",
        }
    }
}

impl fmt::Display for ConfidenceRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agreement level across ensemble families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusRating {
    Unanimous,
    Majority,
    Divided,
}

impl ConsensusRating {
    pub fn from_share(share: f64) -> Self {
        if share >= 0.8 {
            ConsensusRating::Unanimous
        } else if share >= 0.6 {
            ConsensusRating::Majority
        } else {
            ConsensusRating::Divided
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusRating::Unanimous => "highly consistent",
            ConsensusRating::Majority => "mostly consistent",
            ConsensusRating::Divided => "divided",
        }
    }
}

impl fmt::Display for ConsensusRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One family's call on the live window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyPrediction {
    pub family: ModelFamily,
    pub label: Trend,
    pub prob_strong: f64,
    pub prob_weak: f64,
    /// Larger of the two class probabilities.
    pub confidence: f64,
    pub threshold: f64,
    pub train_accuracy: f64,
    pub train_precision: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinglePrediction {
    pub family: ModelFamily,
    pub label: Trend,
    pub prob_strong: f64,
    pub prob_weak: f64,
    pub threshold: f64,
    pub confidence: f64,
    pub rating: ConfidenceRating,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub label: Trend,
    pub votes_strong: usize,
    pub votes_weak: usize,
    /// Majority votes over total votes.
    pub share: f64,
    pub rating: ConsensusRating,
    pub average_confidence: f64,
    /// Family whose call settled an even split, if any.
    pub tie_broken_by: Option<ModelFamily>,
}

impl Consensus {
    pub fn total(&self) -> usize {
        self.votes_strong + self.votes_weak
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub families: Vec<FamilyPrediction>,
    pub consensus: Consensus,
}

fn family_prediction(bundle: &ModelBundle, aligned: &FeatureVector) -> Result<FamilyPrediction, TrainingError> {
    let (prob_strong, prob_weak) = bundle.probabilities(aligned)?;
    Ok(FamilyPrediction {
        family: bundle.family,
        label: Trend::from_probability(prob_weak, bundle.threshold),
        prob_strong,
        prob_weak,
        confidence: prob_strong.max(prob_weak),
        threshold: bundle.threshold,
        train_accuracy: bundle.accuracy,
        train_precision: bundle.avg_precision,
    })
}

/// Score one bundle at its own threshold.
pub fn score_single(bundle: &ModelBundle, aligned: &FeatureVector) -> Result<SinglePrediction, TrainingError> {
    let p = family_prediction(bundle, aligned)?;
    Ok(SinglePrediction {
        family: p.family,
        label: p.label,
        prob_strong: p.prob_strong,
        prob_weak: p.prob_weak,
        threshold: p.threshold,
        confidence: p.confidence,
        rating: ConfidenceRating::from_confidence(p.confidence),
    })
}

/// Score every bundle and vote. Bundles that cannot score the vector are
/// skipped; the call fails only when none can.
pub fn score_ensemble(ensemble: &Ensemble, aligned: &FeatureVector) -> Result<EnsemblePrediction, TrainingError> {
    let mut families = Vec::with_capacity(ensemble.len());
    let mut last_error = None;
    for bundle in ensemble.bundles() {
        match family_prediction(bundle, aligned) {
            Ok(p) => {
                debug!("{}: {} (p_weak={:.3}, threshold={:.2})", p.family, p.label, p.prob_weak, p.threshold);
                families.push(p);
            }
            Err(e) => {
                warn!("{} could not score the live window: {}", bundle.family, e);
                last_error = Some(e);
            }
        }
    }

    match consensus(&families) {
        Some(consensus) => Ok(EnsemblePrediction { families, consensus }),
        None => Err(last_error.unwrap_or(TrainingError::NoModelFitted)),
    }
}

/// Majority vote. An even split goes to the family with the highest training
/// precision (earliest on ties).
pub fn consensus(predictions: &[FamilyPrediction]) -> Option<Consensus> {
    if predictions.is_empty() {
        return None;
    }
    let votes_weak = predictions.iter().filter(|p| p.label == Trend::Weak).count();
    let votes_strong = predictions.len() - votes_weak;

    let (label, tie_broken_by) = if votes_weak > votes_strong {
        (Trend::Weak, None)
    } else if votes_strong > votes_weak {
        (Trend::Strong, None)
    } else {
        let mut arbiter = &predictions[0];
        for p in &predictions[1..] {
            if p.train_precision > arbiter.train_precision {
                arbiter = p;
            }
        }
        (arbiter.label, Some(arbiter.family))
    };

    let total = predictions.len() as f64;
    let share = votes_weak.max(votes_strong) as f64 / total;
    Some(Consensus {
        label,
        votes_strong,
        votes_weak,
        share,
        rating: ConsensusRating::from_share(share),
        average_confidence: predictions.iter().map(|p| p.confidence).sum::<f64>() / total,
        tie_broken_by,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::tests::bundle;
    use crate::types::FeatureName;

    fn prediction(family: ModelFamily, label: Trend, precision: f64, confidence: f64) -> FamilyPrediction {
        FamilyPrediction {
            family,
            label,
            prob_strong: 1.0 - confidence,
            prob_weak: confidence,
            confidence,
            threshold: 0.5,
            train_accuracy: 0.7,
            train_precision: precision,
        }
    }

    #[test]
    fn test_majority_vote() {
        let preds = vec![
            prediction(ModelFamily::RandomForest, Trend::Weak, 0.6, 0.9),
            prediction(ModelFamily::GradientBoosting, Trend::Weak, 0.7, 0.7),
            prediction(ModelFamily::LeafwiseBoosting, Trend::Strong, 0.8, 0.8),
        ];
        let c = consensus(&preds).unwrap();
        assert_eq!(c.label, Trend::Weak);
        assert_eq!((c.votes_weak, c.votes_strong, c.total()), (2, 1, 3));
        assert!((c.share - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(c.rating, ConsensusRating::Majority);
        assert!((c.average_confidence - 0.8).abs() < 1e-12);
        assert_eq!(c.tie_broken_by, None);
    }

    #[test]
    fn test_tie_goes_to_most_precise_family() {
        let preds = vec![
            prediction(ModelFamily::RandomForest, Trend::Weak, 0.65, 0.9),
            prediction(ModelFamily::GradientBoosting, Trend::Strong, 0.72, 0.6),
        ];
        let c = consensus(&preds).unwrap();
        assert_eq!(c.label, Trend::Strong);
        assert_eq!(c.tie_broken_by, Some(ModelFamily::GradientBoosting));
        assert_eq!(c.rating, ConsensusRating::Divided);

        let equal = vec![
            prediction(ModelFamily::RandomForest, Trend::Weak, 0.7, 0.9),
            prediction(ModelFamily::GradientBoosting, Trend::Strong, 0.7, 0.6),
        ];
        assert_eq!(consensus(&equal).unwrap().label, Trend::Weak);
        assert!(consensus(&[]).is_none());
    }

    #[test]
    fn test_ratings() {
        assert_eq!(ConfidenceRating::from_confidence(0.85), ConfidenceRating::VeryHigh);
        assert_eq!(ConfidenceRating::from_confidence(0.7), ConfidenceRating::High);
        assert_eq!(ConfidenceRating::from_confidence(0.65), ConfidenceRating::Medium);
        assert_eq!(ConfidenceRating::from_confidence(0.5), ConfidenceRating::Low);
        assert_eq!(ConsensusRating::from_share(1.0), ConsensusRating::Unanimous);
    }

    #[test]
    fn test_score_ensemble_and_single() {
        let ensemble = Ensemble::new(
            vec![bundle(ModelFamily::RandomForest, 0.6), bundle(ModelFamily::GradientBoosting, 0.7)],
            vec![FeatureName::from("a"), FeatureName::from("b")],
        )
        .unwrap();
        let weak_row = FeatureVector::from_pairs([("a", 1.05), ("b", 0.0)]);

        let prediction = score_ensemble(&ensemble, &weak_row).unwrap();
        assert_eq!(prediction.families.len(), 2);
        assert_eq!(prediction.consensus.label, Trend::Weak);
        assert_eq!(prediction.consensus.rating, ConsensusRating::Unanimous);

        let single = score_single(ensemble.best(), &weak_row).unwrap();
        assert_eq!(single.family, ModelFamily::GradientBoosting);
        assert_eq!(single.label, Trend::Weak);

        let wrong_width = FeatureVector::from_pairs([("a", 1.0)]);
        assert!(score_ensemble(&ensemble, &wrong_width).is_err());
    }
}
