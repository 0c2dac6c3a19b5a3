use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, warn};

use super::sampler::Window;
use super::statistics::{median, FeatureSet, Statistic};
use crate::error::{ExtractionError, PipelineError};
use crate::types::{FeatureFrame, FeatureName, FeatureVector, Signal};

/// Upper bound on extraction threads regardless of host size.
pub const MAX_EXTRACTION_WORKERS: usize = 4;

/// Result of a batch extraction: the imputed, sanitized frame plus the
/// signals whose columns were dropped.
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    pub frame: FeatureFrame,
    pub dropped: Vec<(Signal, ExtractionError)>,
}

impl ExtractionOutput {
    pub fn is_degraded(&self) -> bool {
        !self.dropped.is_empty()
    }
}

/// Turns windows into per-signal summary statistics. One task per signal runs
/// on a bounded rayon pool; results are folded back in signal order.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    signals: Vec<Signal>,
    feature_set: FeatureSet,
    max_workers: usize,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(Signal::ALL.to_vec(), FeatureSet::Minimal)
    }
}

impl FeatureExtractor {
    pub fn new(signals: Vec<Signal>, feature_set: FeatureSet) -> Self {
        Self {
            signals,
            feature_set,
            max_workers: MAX_EXTRACTION_WORKERS,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.clamp(1, MAX_EXTRACTION_WORKERS);
        self
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn feature_set(&self) -> FeatureSet {
        self.feature_set
    }

    fn worker_count(&self) -> usize {
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        self.max_workers.min(cores).max(1)
    }

    /// Extract one row per window. Fails only when every signal was dropped.
    pub fn extract(&self, windows: &[Window<'_>]) -> Result<ExtractionOutput, PipelineError> {
        let ids: Vec<String> = windows.iter().map(|w| w.id()).collect();
        let statistics = self.feature_set.statistics();

        let task = |signal: &Signal| (*signal, extract_signal(*signal, windows, &statistics));
        let results: Vec<(Signal, Result<FeatureFrame, ExtractionError>)> =
            match rayon::ThreadPoolBuilder::new().num_threads(self.worker_count()).build() {
                Ok(pool) => pool.install(|| self.signals.par_iter().map(task).collect()),
                Err(e) => {
                    warn!("Extraction pool unavailable ({}), extracting on the calling thread", e);
                    self.signals.iter().map(task).collect()
                }
            };

        let mut frame = FeatureFrame::empty(ids);
        let mut dropped = Vec::new();
        for (signal, result) in results {
            match result {
                Ok(columns) => match frame.clone().hconcat(columns) {
                    Some(joined) => frame = joined,
                    None => dropped.push((signal, ExtractionError::Pool("row ids diverged".to_string()))),
                },
                Err(e) => {
                    warn!("Dropping signal {} from extraction: {}", signal, e);
                    dropped.push((signal, e));
                }
            }
        }

        if frame.n_cols() == 0 {
            return Err(PipelineError::ExtractionFailed);
        }

        debug!(
            "Extracted {} features for {} windows ({} signals dropped)",
            frame.n_cols(),
            frame.n_rows(),
            dropped.len()
        );

        Ok(ExtractionOutput {
            frame: impute(frame).sanitized(),
            dropped,
        })
    }

    /// Extract the single live window used at inference time.
    pub fn extract_one(&self, window: &Window<'_>) -> Result<(FeatureVector, Vec<(Signal, ExtractionError)>), PipelineError> {
        let output = self.extract(std::slice::from_ref(window))?;
        Ok((output.frame.row(0), output.dropped))
    }
}

fn extract_signal(
    signal: Signal,
    windows: &[Window<'_>],
    statistics: &[Statistic],
) -> Result<FeatureFrame, ExtractionError> {
    let mut values = Array2::<f64>::zeros((windows.len(), statistics.len()));
    let mut buffer = Vec::new();

    for (i, window) in windows.iter().enumerate() {
        if window.is_empty() {
            return Err(ExtractionError::EmptyWindow {
                signal,
                window_id: window.id(),
            });
        }
        buffer.clear();
        buffer.extend(window.bars().iter().map(|b| b.signal(signal)));
        if buffer.iter().any(|v| !v.is_finite()) {
            return Err(ExtractionError::NonFiniteInput {
                signal,
                window_id: window.id(),
            });
        }
        for (j, stat) in statistics.iter().enumerate() {
            values[[i, j]] = (stat.compute)(&buffer);
        }
    }

    let ids = windows.iter().map(|w| w.id()).collect();
    let columns = statistics
        .iter()
        .map(|stat| FeatureName::sanitize(&format!("{}__{}", signal, stat.name)))
        .collect();
    FeatureFrame::new(ids, columns, values).ok_or_else(|| ExtractionError::Pool("column shape mismatch".to_string()))
}

/// Replace non-finite cells with the column median of finite cells, or 0
/// when the column has none.
fn impute(frame: FeatureFrame) -> FeatureFrame {
    let mut values = frame.values().clone();
    for mut column in values.columns_mut() {
        if column.iter().all(|v| v.is_finite()) {
            continue;
        }
        let finite: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
        let fill = if finite.is_empty() { 0.0 } else { median(&finite) };
        column.iter_mut().filter(|v| !v.is_finite()).for_each(|v| *v = fill);
    }
    FeatureFrame::new(frame.ids().to_vec(), frame.columns().to_vec(), values).unwrap_or(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DailyBar, TimeSeries};
    use chrono::{Duration, NaiveDate};

    fn series(len: usize) -> TimeSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars = (0..len)
            .map(|i| DailyBar {
                date: start + Duration::days(i as i64),
                close: 10.0 + i as f64,
                open: 9.5 + i as f64,
                volume: 1000.0 * (i % 3 + 1) as f64,
                ..Default::default()
            })
            .collect();
        TimeSeries::new("000001", bars).unwrap()
    }

    #[test]
    fn test_extract_minimal_columns_in_signal_order() {
        let s = series(30);
        let windows = [Window::new("000001", 10, &s.bars()[0..10]), Window::new("000001", 20, &s.bars()[10..20])];
        let extractor = FeatureExtractor::new(vec![Signal::Close, Signal::Volume], FeatureSet::Minimal);
        let output = extractor.extract(&windows).unwrap();

        assert!(!output.is_degraded());
        assert_eq!(output.frame.n_rows(), 2);
        assert_eq!(output.frame.n_cols(), 20);
        assert_eq!(output.frame.columns()[0].as_str(), "Close_sum_values");
        assert_eq!(output.frame.columns()[10].as_str(), "Volume_sum_values");

        let row = output.frame.row(1);
        assert_eq!(row.get(&"Close_mean".into()), Some(24.5));
        assert_eq!(row.get(&"Close_length".into()), Some(10.0));
        assert_eq!(output.frame.ids(), &["000001_10".to_string(), "000001_20".to_string()]);
    }

    #[test]
    fn test_failed_signal_is_dropped_not_fatal() {
        let mut s = series(12);
        let mut bars = s.bars().to_vec();
        bars[3].open = f64::NAN;
        s = TimeSeries::new("000001", bars).unwrap();

        let windows = [Window::new("000001", 10, &s.bars()[0..10])];
        let extractor = FeatureExtractor::new(vec![Signal::Close, Signal::Open], FeatureSet::Minimal);
        let output = extractor.extract(&windows).unwrap();

        assert_eq!(output.dropped.len(), 1);
        assert_eq!(output.dropped[0].0, Signal::Open);
        assert!(output.frame.columns().iter().all(|c| c.as_str().starts_with("Close_")));
    }

    #[test]
    fn test_all_signals_failing_is_an_error() {
        let s = series(5);
        let windows = [Window::new("000001", 0, &s.bars()[0..0])];
        let extractor = FeatureExtractor::new(vec![Signal::Close], FeatureSet::Minimal);
        assert!(matches!(extractor.extract(&windows), Err(PipelineError::ExtractionFailed)));
    }

    #[test]
    fn test_comprehensive_names_are_sanitized_and_imputed() {
        let s = series(30);
        let flat: Vec<DailyBar> = s.bars()[..10]
            .iter()
            .map(|b| DailyBar { close: 5.0, ..b.clone() })
            .collect();
        let windows = [Window::new("000001", 10, &flat)];
        let extractor = FeatureExtractor::new(vec![Signal::Close], FeatureSet::Comprehensive).with_max_workers(2);
        let (vector, dropped) = extractor.extract_one(&windows[0]).unwrap();

        assert!(dropped.is_empty());
        assert_eq!(vector.len(), 25);
        assert!(vector.values().iter().all(|v| v.is_finite()));
        assert_eq!(vector.get(&"Close_skewness".into()), Some(0.0));
        assert!(vector.get(&"Close_linear_trend_attr_slope".into()).is_some());
        assert!(vector.get(&"Close_quantile_q_0.9".into()).is_some());
    }

    #[test]
    fn test_impute_uses_median_then_zero() {
        let frame = FeatureFrame::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec!["x".into(), "y".into()],
            ndarray::array![[1.0, f64::NAN], [f64::NAN, f64::NAN], [3.0, f64::INFINITY]],
        )
        .unwrap();
        let imputed = impute(frame);
        assert_eq!(imputed.values()[[1, 0]], 2.0);
        assert_eq!(imputed.values()[[0, 1]], 0.0);
        assert_eq!(imputed.values()[[2, 1]], 0.0);
    }
}
