//! Summary statistics computed over one signal's window. Raw names follow
//! the `name__param_value` convention and are sanitized by the extractor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named statistic over a non-empty, finite slice. May return NaN when the
/// statistic is undefined for the input (e.g. skewness of a constant).
#[derive(Clone, Copy)]
pub struct Statistic {
    pub name: &'static str,
    pub compute: fn(&[f64]) -> f64,
}

impl fmt::Debug for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

const MINIMAL: &[Statistic] = &[
    Statistic { name: "sum_values", compute: sum_values },
    Statistic { name: "median", compute: median },
    Statistic { name: "mean", compute: mean },
    Statistic { name: "length", compute: length },
    Statistic { name: "standard_deviation", compute: standard_deviation },
    Statistic { name: "variance", compute: variance },
    Statistic { name: "root_mean_square", compute: root_mean_square },
    Statistic { name: "maximum", compute: maximum },
    Statistic { name: "absolute_maximum", compute: absolute_maximum },
    Statistic { name: "minimum", compute: minimum },
];

const EXTENDED: &[Statistic] = &[
    Statistic { name: "skewness", compute: skewness },
    Statistic { name: "kurtosis", compute: kurtosis },
    Statistic { name: "abs_energy", compute: abs_energy },
    Statistic { name: "mean_abs_change", compute: mean_abs_change },
    Statistic { name: "mean_change", compute: mean_change },
    Statistic { name: "quantile__q_0.1", compute: quantile_10 },
    Statistic { name: "quantile__q_0.9", compute: quantile_90 },
    Statistic { name: "autocorrelation__lag_1", compute: autocorrelation_lag_1 },
    Statistic { name: "linear_trend__attr_\"slope\"", compute: linear_trend_slope },
    Statistic { name: "linear_trend__attr_\"rvalue\"", compute: linear_trend_rvalue },
    Statistic { name: "count_above_mean", compute: count_above_mean },
    Statistic { name: "count_below_mean", compute: count_below_mean },
    Statistic { name: "first_location_of_maximum", compute: first_location_of_maximum },
    Statistic { name: "last_location_of_minimum", compute: last_location_of_minimum },
    Statistic {
        name: "change_quantiles__f_agg_\"mean\"__isabs_True__qh_0.8__ql_0.2",
        compute: change_quantiles_abs_mean,
    },
];

/// Which statistic battery the extractor runs per signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    #[default]
    Minimal,
    Comprehensive,
}

impl FeatureSet {
    pub fn statistics(&self) -> Vec<Statistic> {
        match self {
            FeatureSet::Minimal => MINIMAL.to_vec(),
            FeatureSet::Comprehensive => MINIMAL.iter().chain(EXTENDED).copied().collect(),
        }
    }
}

impl FromStr for FeatureSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(FeatureSet::Minimal),
            "comprehensive" => Ok(FeatureSet::Comprehensive),
            other => Err(format!("unknown feature set: {}", other)),
        }
    }
}

fn sum_values(x: &[f64]) -> f64 {
    x.iter().sum()
}

fn length(x: &[f64]) -> f64 {
    x.len() as f64
}

pub fn mean(x: &[f64]) -> f64 {
    sum_values(x) / x.len() as f64
}

fn sorted(x: &[f64]) -> Vec<f64> {
    let mut v = x.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

/// Linear interpolation between closest ranks.
pub fn quantile(x: &[f64], q: f64) -> f64 {
    let v = sorted(x);
    let pos = q * (v.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    v[lo] + (v[hi] - v[lo]) * (pos - lo as f64)
}

pub fn median(x: &[f64]) -> f64 {
    quantile(x, 0.5)
}

fn quantile_10(x: &[f64]) -> f64 {
    quantile(x, 0.1)
}

fn quantile_90(x: &[f64]) -> f64 {
    quantile(x, 0.9)
}

/// Population variance.
fn variance(x: &[f64]) -> f64 {
    let m = mean(x);
    x.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / x.len() as f64
}

fn standard_deviation(x: &[f64]) -> f64 {
    variance(x).sqrt()
}

fn root_mean_square(x: &[f64]) -> f64 {
    (abs_energy(x) / x.len() as f64).sqrt()
}

fn maximum(x: &[f64]) -> f64 {
    x.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn minimum(x: &[f64]) -> f64 {
    x.iter().copied().fold(f64::INFINITY, f64::min)
}

fn absolute_maximum(x: &[f64]) -> f64 {
    x.iter().map(|v| v.abs()).fold(0.0, f64::max)
}

fn abs_energy(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum()
}

fn central_moment(x: &[f64], k: i32) -> f64 {
    let m = mean(x);
    x.iter().map(|v| (v - m).powi(k)).sum::<f64>() / x.len() as f64
}

/// Adjusted Fisher-Pearson skewness (G1).
fn skewness(x: &[f64]) -> f64 {
    let n = x.len() as f64;
    let m2 = central_moment(x, 2);
    if x.len() < 3 || m2 == 0.0 {
        return f64::NAN;
    }
    let g1 = central_moment(x, 3) / m2.powf(1.5);
    g1 * (n * (n - 1.0)).sqrt() / (n - 2.0)
}

/// Bias-corrected excess kurtosis (G2).
fn kurtosis(x: &[f64]) -> f64 {
    let n = x.len() as f64;
    let m2 = central_moment(x, 2);
    if x.len() < 4 || m2 == 0.0 {
        return f64::NAN;
    }
    let g2 = central_moment(x, 4) / (m2 * m2) - 3.0;
    ((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0))
}

fn mean_abs_change(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return f64::NAN;
    }
    x.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (x.len() - 1) as f64
}

fn mean_change(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return f64::NAN;
    }
    (x[x.len() - 1] - x[0]) / (x.len() - 1) as f64
}

fn autocorrelation_lag_1(x: &[f64]) -> f64 {
    let n = x.len();
    let var = variance(x);
    if n < 2 || var == 0.0 {
        return f64::NAN;
    }
    let m = mean(x);
    let cov: f64 = x.windows(2).map(|w| (w[0] - m) * (w[1] - m)).sum();
    cov / ((n - 1) as f64 * var)
}

/// Least-squares fit of the values against their index: `(slope, r)`.
fn linear_trend(x: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    if x.len() < 2 {
        return (f64::NAN, f64::NAN);
    }
    let mean_t = (n - 1.0) / 2.0;
    let mean_x = mean(x);
    let (mut sxy, mut stt, mut sxx) = (0.0, 0.0, 0.0);
    for (t, v) in x.iter().enumerate() {
        let dt = t as f64 - mean_t;
        let dx = v - mean_x;
        sxy += dt * dx;
        stt += dt * dt;
        sxx += dx * dx;
    }
    let slope = sxy / stt;
    let r = if sxx == 0.0 { 0.0 } else { sxy / (stt * sxx).sqrt() };
    (slope, r)
}

fn linear_trend_slope(x: &[f64]) -> f64 {
    linear_trend(x).0
}

fn linear_trend_rvalue(x: &[f64]) -> f64 {
    linear_trend(x).1
}

fn count_above_mean(x: &[f64]) -> f64 {
    let m = mean(x);
    x.iter().filter(|&&v| v > m).count() as f64
}

fn count_below_mean(x: &[f64]) -> f64 {
    let m = mean(x);
    x.iter().filter(|&&v| v < m).count() as f64
}

/// Relative position of the first maximum, in `[0, 1)`.
fn first_location_of_maximum(x: &[f64]) -> f64 {
    let max = maximum(x);
    let idx = x.iter().position(|&v| v == max).unwrap_or(0);
    idx as f64 / x.len() as f64
}

/// Relative position just past the last minimum, in `(0, 1]`.
fn last_location_of_minimum(x: &[f64]) -> f64 {
    let min = minimum(x);
    let from_end = x.iter().rev().position(|&v| v == min).unwrap_or(0);
    1.0 - from_end as f64 / x.len() as f64
}

/// Mean absolute change between consecutive values that both lie inside the
/// 0.2..0.8 quantile corridor; 0 when no consecutive pair does.
fn change_quantiles_abs_mean(x: &[f64]) -> f64 {
    let lo = quantile(x, 0.2);
    let hi = quantile(x, 0.8);
    let inside: Vec<bool> = x.iter().map(|&v| v >= lo && v <= hi).collect();
    let changes: Vec<f64> = x
        .windows(2)
        .zip(inside.windows(2))
        .filter(|(_, ok)| ok[0] && ok[1])
        .map(|(w, _)| (w[1] - w[0]).abs())
        .collect();
    if changes.is_empty() {
        0.0
    } else {
        mean(&changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: [f64; 5] = [2.0, -4.0, 6.0, 8.0, 3.0];

    fn stat(name: &str) -> fn(&[f64]) -> f64 {
        FeatureSet::Comprehensive
            .statistics()
            .into_iter()
            .find(|s| s.name == name)
            .map(|s| s.compute)
            .unwrap()
    }

    #[test]
    fn test_minimal_battery_values() {
        assert_eq!(FeatureSet::Minimal.statistics().len(), 10);
        assert_eq!(stat("sum_values")(&X), 15.0);
        assert_eq!(stat("mean")(&X), 3.0);
        assert_eq!(stat("median")(&X), 3.0);
        assert_eq!(stat("length")(&X), 5.0);
        assert!((stat("variance")(&X) - 16.8).abs() < 1e-12);
        assert!((stat("standard_deviation")(&X) - 16.8f64.sqrt()).abs() < 1e-12);
        assert!((stat("root_mean_square")(&X) - (129.0f64 / 5.0).sqrt()).abs() < 1e-12);
        assert_eq!(stat("maximum")(&X), 8.0);
        assert_eq!(stat("minimum")(&X), -4.0);
        assert_eq!(stat("absolute_maximum")(&[-9.0, 3.0]), 9.0);
    }

    #[test]
    fn test_quantiles_interpolate() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&x, 0.5) - 2.5).abs() < 1e-12);
        assert!((quantile(&x, 0.1) - 1.3).abs() < 1e-12);
        assert_eq!(quantile(&[7.0], 0.9), 7.0);
    }

    #[test]
    fn test_trend_and_changes() {
        let ramp = [1.0, 3.0, 5.0, 7.0];
        assert!((stat("linear_trend__attr_\"slope\"")(&ramp) - 2.0).abs() < 1e-12);
        assert!((stat("linear_trend__attr_\"rvalue\"")(&ramp) - 1.0).abs() < 1e-12);
        assert_eq!(stat("mean_change")(&ramp), 2.0);
        assert_eq!(stat("mean_abs_change")(&[1.0, 3.0, 2.0]), 1.5);
        assert_eq!(stat("count_above_mean")(&ramp), 2.0);
        assert_eq!(stat("first_location_of_maximum")(&ramp), 0.75);
        assert_eq!(stat("last_location_of_minimum")(&ramp), 0.25);
    }

    #[test]
    fn test_undefined_moments_are_nan() {
        let flat = [3.0; 6];
        assert!(stat("skewness")(&flat).is_nan());
        assert!(stat("kurtosis")(&flat).is_nan());
        assert!(stat("autocorrelation__lag_1")(&flat).is_nan());
        assert_eq!(stat("change_quantiles__f_agg_\"mean\"__isabs_True__qh_0.8__ql_0.2")(&flat), 0.0);
    }

    #[test]
    fn test_symmetric_sample_has_zero_skew() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(stat("skewness")(&x).abs() < 1e-12);
        assert!((stat("kurtosis")(&x) - (-1.2)).abs() < 1e-9);
    }
}
