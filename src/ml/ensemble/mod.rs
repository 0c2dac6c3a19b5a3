pub mod aggregator;
pub mod trainer;

pub use aggregator::{
    consensus, score_ensemble, score_single, ConfidenceRating, Consensus, ConsensusRating, EnsemblePrediction,
    FamilyPrediction, SinglePrediction,
};
pub use trainer::{EnsembleTrainer, FamilyFailure, TrainerSettings, TrainingOutcome};
