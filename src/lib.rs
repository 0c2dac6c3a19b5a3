//! Forecasts whether a stock's close will sit below its 20-day moving
//! average a few sessions ahead, from windowed statistics of daily bars.

pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod ml;
pub mod pipeline;
pub mod types;

pub use error::PipelineError;
pub use pipeline::{PredictionOutcome, PredictionResult, PredictionRunner};
