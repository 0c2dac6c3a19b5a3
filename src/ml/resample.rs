//! Class rebalancing for the training split: SMOTE over-sampling of the
//! minority class followed by removal of Tomek links.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::ResampleError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoteTomek {
    pub k_neighbors: usize,
    pub seed: u64,
}

impl Default for SmoteTomek {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            seed: 42,
        }
    }
}

impl SmoteTomek {
    pub fn new(k_neighbors: usize, seed: u64) -> Self {
        Self { k_neighbors, seed }
    }

    /// Returns a new matrix and label vector. The original rows come first,
    /// followed by synthetic minority rows, minus any rows in a Tomek link.
    pub fn resample(&self, x: ArrayView2<'_, f64>, y: &[u8]) -> Result<(Array2<f64>, Vec<u8>), ResampleError> {
        let positives: Vec<usize> = (0..y.len()).filter(|&i| y[i] == 1).collect();
        let negatives: Vec<usize> = (0..y.len()).filter(|&i| y[i] != 1).collect();
        if positives.is_empty() || negatives.is_empty() {
            return Err(ResampleError::SingleClass);
        }

        let (minority, majority, minority_label) = if positives.len() <= negatives.len() {
            (positives, negatives, 1u8)
        } else {
            (negatives, positives, 0u8)
        };
        if minority.len() < 2 {
            return Err(ResampleError::TooFewMinority(minority.len()));
        }

        let (x_over, y_over) = self.smote(x, y, &minority, majority.len() - minority.len(), minority_label);
        let keep = tomek_survivors(x_over.view(), &y_over);
        let x_out = x_over.select(Axis(0), &keep);
        let y_out = keep.iter().map(|&i| y_over[i]).collect();
        Ok((x_out, y_out))
    }

    fn smote(
        &self,
        x: ArrayView2<'_, f64>,
        y: &[u8],
        minority: &[usize],
        n_synthetic: usize,
        label: u8,
    ) -> (Array2<f64>, Vec<u8>) {
        let mut rows: Vec<f64> = x.iter().copied().collect();
        let mut labels = y.to_vec();
        if n_synthetic == 0 {
            return (x.to_owned(), labels);
        }

        let k = self.k_neighbors.clamp(1, minority.len() - 1);
        let neighbors: Vec<Vec<usize>> = minority
            .iter()
            .map(|&i| {
                let mut by_distance: Vec<(f64, usize)> = minority
                    .iter()
                    .filter(|&&j| j != i)
                    .map(|&j| (squared_distance(x.row(i), x.row(j)), j))
                    .collect();
                by_distance.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                by_distance.into_iter().take(k).map(|(_, j)| j).collect()
            })
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        for _ in 0..n_synthetic {
            let pick = rng.gen_range(0..minority.len());
            let base = x.row(minority[pick]);
            let other = x.row(neighbors[pick][rng.gen_range(0..neighbors[pick].len())]);
            let gap: f64 = rng.gen();
            rows.extend(base.iter().zip(other.iter()).map(|(a, b)| a + gap * (b - a)));
            labels.push(label);
        }

        let n = labels.len();
        let d = x.ncols();
        let matrix = Array2::from_shape_vec((n, d), rows).unwrap_or_else(|_| Array2::zeros((n, d)));
        (matrix, labels)
    }
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(p, q)| (p - q) * (p - q)).sum()
}

/// Indices of rows that are not part of a Tomek link (mutual nearest
/// neighbours with different labels). Both ends of every link are removed.
fn tomek_survivors(x: ArrayView2<'_, f64>, y: &[u8]) -> Vec<usize> {
    let n = x.nrows();
    let nearest: Vec<Option<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| j != i)
                .map(|j| (squared_distance(x.row(i), x.row(j)), j))
                .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
                .map(|(_, j)| j)
        })
        .collect();

    (0..n)
        .filter(|&i| match nearest[i] {
            Some(j) => !(y[i] != y[j] && nearest[j] == Some(i)),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_smote_balances_classes() {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [0.2, 0.1],
            [0.1, 0.2],
            [0.3, 0.3],
            [5.0, 5.0],
            [5.1, 5.0],
            [5.0, 5.2]
        ];
        let y = [0, 0, 0, 0, 0, 0, 1, 1, 1];
        let (x_res, y_res) = SmoteTomek::default().resample(x.view(), &y).unwrap();

        let weak = y_res.iter().filter(|&&l| l == 1).count();
        let strong = y_res.len() - weak;
        assert_eq!(weak, 6);
        assert_eq!(strong, 6);
        assert_eq!(x_res.nrows(), y_res.len());
        // Synthetic rows lie between existing minority points.
        for row in x_res.rows().into_iter().skip(9) {
            assert!(row[0] >= 5.0 && row[0] <= 5.1);
            assert!(row[1] >= 5.0 && row[1] <= 5.2);
        }
    }

    #[test]
    fn test_tomek_links_are_removed() {
        let x = array![[0.0], [1.0], [1.05], [3.0]];
        let y = [0, 0, 1, 1];
        let keep = tomek_survivors(x.view(), &y);
        assert_eq!(keep, vec![0, 3]);
    }

    #[test]
    fn test_resample_errors() {
        let x = array![[0.0], [1.0], [2.0]];
        assert_eq!(
            SmoteTomek::default().resample(x.view(), &[0, 0, 0]).unwrap_err(),
            ResampleError::SingleClass
        );
        assert_eq!(
            SmoteTomek::default().resample(x.view(), &[0, 0, 1]).unwrap_err(),
            ResampleError::TooFewMinority(1)
        );
    }

    #[test]
    fn test_resample_is_deterministic() {
        let x = array![[0.0], [0.5], [1.0], [1.5], [2.0], [9.0], [9.5]];
        let y = [0, 0, 0, 0, 0, 1, 1];
        let a = SmoteTomek::default().resample(x.view(), &y).unwrap();
        let b = SmoteTomek::default().resample(x.view(), &y).unwrap();
        assert_eq!(a, b);
    }
}
