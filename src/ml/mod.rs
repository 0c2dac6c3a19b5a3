pub mod align;
pub mod ensemble;
pub mod features;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod resample;
pub mod sampler;
pub mod selection;
pub mod statistics;
pub mod threshold;
pub mod trees;

pub use align::{align, align_frame};
pub use ensemble::{EnsembleTrainer, TrainerSettings};
pub use features::{ExtractionOutput, FeatureExtractor};
pub use model::{Ensemble, FittedModel, ModelBundle, ModelFamily};
pub use persistence::{ModelInfo, ModelStore, TrainedModel};
pub use sampler::{LabelRule, Sample, Window, WindowSampler};
pub use selection::{FeatureSelector, SelectionOutcome, SelectionSettings};
pub use threshold::{find_threshold, ThresholdMetric};
