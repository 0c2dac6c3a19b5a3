pub mod ema;
pub mod rsi;
pub mod macd;

pub use ema::*;
pub use rsi::*;
pub use macd::*;

use std::collections::VecDeque;

/// Rolling simple moving average. Yields `None` until `period` values are seen.
/// The window is summed on read so a non-finite input only poisons the
/// windows that contain it.
#[derive(Debug, Clone)]
pub struct SMA {
    period: usize,
    window: VecDeque<f64>,
}

impl SMA {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period),
        }
    }

    pub fn update(&mut self, value: f64) -> Option<f64> {
        self.window.push_back(value);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.period > 0 && self.window.len() == self.period {
            Some(self.window.iter().sum::<f64>() / self.period as f64)
        } else {
            None
        }
    }
}

pub fn sma_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut sma = SMA::new(period);
    values.iter().map(|v| sma.update(*v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_series_warmup() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = sma_series(&values, 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(2.0));
        assert_eq!(out[4], Some(4.0));
    }

    #[test]
    fn test_sma_non_finite_only_poisons_its_windows() {
        let out = sma_series(&[1.0, f64::NAN, 3.0, 5.0, 7.0], 2);
        assert!(out[1].unwrap().is_nan());
        assert!(out[2].unwrap().is_nan());
        assert_eq!(out[3], Some(4.0));
        assert_eq!(out[4], Some(6.0));
    }
}
