use thiserror::Error;

use crate::types::Signal;

/// Terminal failures of a single training or prediction attempt.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("market data unavailable for {ticker}: {reason}")]
    DataUnavailable { ticker: String, reason: String },

    #[error("insufficient history for {ticker}: have {available} rows, need {required}")]
    InsufficientHistory {
        ticker: String,
        available: usize,
        required: usize,
    },

    #[error("feature extraction produced no usable signal")]
    ExtractionFailed,

    #[error("no training samples could be built (window={window}, horizon={horizon})")]
    NoSamples { window: usize, horizon: usize },

    #[error("training failed: {0}")]
    Training(#[from] TrainingError),

    #[error("model store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn data_unavailable(ticker: &str, reason: impl Into<String>) -> Self {
        PipelineError::DataUnavailable {
            ticker: ticker.to_string(),
            reason: reason.into(),
        }
    }
}

/// Per-signal extraction failure. The signal's columns are dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("{signal} has a non-finite value in window {window_id}")]
    NonFiniteInput { signal: Signal, window_id: String },

    #[error("{signal} window {window_id} is empty")]
    EmptyWindow { signal: Signal, window_id: String },

    #[error("extraction worker pool unavailable: {0}")]
    Pool(String),
}

/// Statistical filter failure. Selection falls back to a passthrough.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    #[error("labels contain a single class")]
    SingleClass,

    #[error("feature frame is empty")]
    EmptyFrame,

    #[error("feature rows ({rows}) and labels ({labels}) differ in length")]
    LengthMismatch { rows: usize, labels: usize },

    #[error("no feature passed the significance test")]
    NothingRelevant,

    #[error("statistics error: {0}")]
    Statistics(String),
}

/// Failure of one model family, or of the whole training run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainingError {
    #[error("training split is empty")]
    EmptyTrainingSet,

    #[error("held-out split is empty")]
    EmptyTestSet,

    #[error("training labels contain a single class")]
    SingleClass,

    #[error("feature matrix contains non-finite values")]
    NonFiniteFeatures,

    #[error("feature count mismatch: model expects {expected}, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("invalid hyperparameter: {0}")]
    InvalidParameter(String),

    #[error("no model family could be fitted")]
    NoModelFitted,
}

/// Class-balancing failure. Training proceeds on the raw split.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResampleError {
    #[error("minority class has {0} samples, need at least 2")]
    TooFewMinority(usize),

    #[error("labels contain a single class")]
    SingleClass,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("codec error for key {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("stored model is incomplete: missing {0}")]
    Incomplete(&'static str),
}
