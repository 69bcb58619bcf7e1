//! Running feature-wise normalization with masked updates.

use ndarray::{Array2, Array3, ArrayView1};
use serde::{Deserialize, Serialize};

/// Running per-feature standardization layer.
///
/// Accumulates mean and variance online (Welford merge) over every unmasked
/// position seen while in training mode; statistics are frozen outside
/// training mode and reused identically. Before the first update the layer
/// is exactly the identity.
///
/// The struct serializes so frozen statistics can be persisted and restored
/// for reproducible inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningNorm {
    dim: usize,
    count: f64,
    mean: Vec<f64>,
    m2: Vec<f64>,
    training: bool,
}

impl RunningNorm {
    /// New identity layer over `dim` features.
    pub fn new(dim: usize) -> Self {
        Self { dim, count: 0.0, mean: vec![0.0; dim], m2: vec![0.0; dim], training: false }
    }

    /// Feature width.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Whether statistics updates are enabled.
    pub fn training(&self) -> bool {
        self.training
    }

    /// Enable or disable statistics updates.
    pub fn set_training(&mut self, on: bool) {
        self.training = on;
    }

    /// Number of positions accumulated so far.
    pub fn count(&self) -> f64 {
        self.count
    }

    /// Current standard deviation of feature `j` (1 before any update).
    fn std(&self, j: usize) -> f64 {
        if self.count < 1.0 {
            return 1.0;
        }
        let var = self.m2[j] / self.count;
        var.sqrt().max(1e-6)
    }

    /// Accumulate one row of unmasked values. No-op outside training mode.
    pub fn update_row(&mut self, row: ArrayView1<f64>) {
        if !self.training {
            return;
        }
        debug_assert_eq!(row.len(), self.dim);
        // Chan et al. pairwise merge with a single-sample batch.
        let n = self.count + 1.0;
        for j in 0..self.dim {
            let delta = row[j] - self.mean[j];
            self.mean[j] += delta / n;
            self.m2[j] += delta * (row[j] - self.mean[j]);
        }
        self.count = n;
    }

    /// Accumulate every unmasked position of a `(batch, mult, dim)` block.
    pub fn observe(&mut self, values: &Array3<f64>, mask: Option<&Array2<bool>>) {
        if !self.training {
            return;
        }
        let (b, m, _) = values.dim();
        for e in 0..b {
            for o in 0..m {
                if mask.map_or(true, |mk| mk[(e, o)]) {
                    self.update_row(values.index_axis(ndarray::Axis(0), e).row(o));
                }
            }
        }
    }

    /// Accumulate every row of a `(batch, dim)` block.
    pub fn observe_2d(&mut self, values: &Array2<f64>) {
        if !self.training {
            return;
        }
        for row in values.rows() {
            self.update_row(row);
        }
    }

    /// Standardize one row in place.
    pub fn normalize_row(&self, row: &mut [f64]) {
        for (j, v) in row.iter_mut().enumerate() {
            *v = (*v - self.mean[j]) / self.std(j);
        }
    }

    /// Exact inverse of [`normalize_row`](Self::normalize_row).
    pub fn denormalize_row(&self, row: &mut [f64]) {
        for (j, v) in row.iter_mut().enumerate() {
            *v = *v * self.std(j) + self.mean[j];
        }
    }

    /// Standardize a `(batch, dim)` block, returning a new array.
    pub fn normalize_2d(&self, values: &Array2<f64>) -> Array2<f64> {
        let mut out = values.clone();
        for ((_, j), v) in out.indexed_iter_mut() {
            *v = (*v - self.mean[j]) / self.std(j);
        }
        out
    }

    /// Standardize a `(batch, mult, dim)` block, returning a new array.
    pub fn normalize_3d(&self, values: &Array3<f64>) -> Array3<f64> {
        let mut out = values.clone();
        for ((_, _, j), v) in out.indexed_iter_mut() {
            *v = (*v - self.mean[j]) / self.std(j);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr2, Array3};

    #[test]
    fn test_identity_before_any_update() {
        let norm = RunningNorm::new(2);
        let x = arr2(&[[3.0, -4.0]]);
        let y = norm.normalize_2d(&x);
        assert_eq!(y, x);
    }

    #[test]
    fn test_masked_positions_never_contribute() {
        let mut norm = RunningNorm::new(1);
        norm.set_training(true);

        let mut values = Array3::<f64>::zeros((2, 2, 1));
        values[(0, 0, 0)] = 1.0;
        values[(0, 1, 0)] = 1e9; // padded garbage
        values[(1, 0, 0)] = 3.0;
        values[(1, 1, 0)] = -1e9; // padded garbage
        let mask = arr2(&[[true, false], [true, false]]);

        norm.observe(&values, Some(&mask));
        assert_eq!(norm.count(), 2.0);
        assert_relative_eq!(norm.mean[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_frozen_outside_training_mode() {
        let mut norm = RunningNorm::new(1);
        norm.set_training(true);
        norm.observe_2d(&arr2(&[[1.0], [3.0]]));
        norm.set_training(false);
        norm.observe_2d(&arr2(&[[100.0], [200.0]]));
        assert_eq!(norm.count(), 2.0);
    }

    #[test]
    fn test_normalize_denormalize_round_trip() {
        let mut norm = RunningNorm::new(2);
        norm.set_training(true);
        norm.observe_2d(&arr2(&[[1.0, 10.0], [3.0, 30.0], [5.0, 20.0]]));

        let mut row = [4.2, 17.0];
        let orig = row;
        norm.normalize_row(&mut row);
        norm.denormalize_row(&mut row);
        assert_relative_eq!(row[0], orig[0], epsilon = 1e-12);
        assert_relative_eq!(row[1], orig[1], epsilon = 1e-12);
    }

    #[test]
    fn test_statistics_match_batch_moments() {
        let mut norm = RunningNorm::new(1);
        norm.set_training(true);
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        for &x in &xs {
            norm.observe_2d(&arr2(&[[x]]));
        }
        assert_relative_eq!(norm.mean[0], 5.0, epsilon = 1e-12);
        // Population variance of the classic fixture is 4.
        assert_relative_eq!(norm.m2[0] / norm.count(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_serde_round_trip_preserves_frozen_stats() {
        let mut norm = RunningNorm::new(1);
        norm.set_training(true);
        norm.observe_2d(&arr2(&[[1.0], [2.0], [3.0]]));
        norm.set_training(false);

        let json = serde_json::to_string(&norm).unwrap();
        let back: RunningNorm = serde_json::from_str(&json).unwrap();
        let mut a = [10.0];
        let mut b = [10.0];
        norm.normalize_row(&mut a);
        back.normalize_row(&mut b);
        assert_eq!(a, b);
    }
}
