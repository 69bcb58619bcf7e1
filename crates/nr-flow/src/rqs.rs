//! Monotonic rational-quadratic spline transforms.
//!
//! One spline maps `[-B, B]` onto itself through `K` monotone
//! rational-quadratic segments (Gregory-Delbourgo interpolants) with linear
//! tails: outside the support the transform is the identity with zero
//! log-determinant contribution. Both directions are closed-form and exact
//! inverses of each other.
//!
//! Raw parameters come straight from a conditioner network: `K` unnormalized
//! widths, `K` unnormalized heights and `K - 1` unnormalized interior
//! derivatives per transformed dimension ([`PARAMS_PER_DIM`] in total). The
//! normalization is chosen so an all-zero raw vector yields exactly the
//! identity transform.

/// Minimum relative bin width.
pub const MIN_BIN_WIDTH: f64 = 1e-3;
/// Minimum relative bin height.
pub const MIN_BIN_HEIGHT: f64 = 1e-3;
/// Minimum knot derivative.
pub const MIN_DERIVATIVE: f64 = 1e-3;

/// Number of raw conditioner outputs per transformed dimension.
pub fn params_per_dim(num_bins: usize) -> usize {
    3 * num_bins - 1
}

/// A fully materialized monotone spline on `[-tail_bound, tail_bound]`.
#[derive(Debug, Clone)]
pub struct Spline {
    /// Knot x-positions, length `K + 1`.
    xs: Vec<f64>,
    /// Knot y-positions, length `K + 1`.
    ys: Vec<f64>,
    /// Knot derivatives, length `K + 1`; boundaries pinned to 1 for linear tails.
    derivs: Vec<f64>,
    tail_bound: f64,
}

#[inline]
fn softplus(x: f64) -> f64 {
    // Stable for large |x|.
    if x > 0.0 { x + (-x).exp().ln_1p() } else { x.exp().ln_1p() }
}

impl Spline {
    /// Materialize a spline from raw conditioner outputs.
    ///
    /// `raw` must hold `3 * num_bins - 1` values: widths, heights, then the
    /// interior derivatives. An all-zero `raw` produces the identity.
    pub fn from_raw(raw: &[f64], num_bins: usize, tail_bound: f64) -> Self {
        debug_assert_eq!(raw.len(), params_per_dim(num_bins));
        let k = num_bins;
        let (raw_w, rest) = raw.split_at(k);
        let (raw_h, raw_d) = rest.split_at(k);

        let span = 2.0 * tail_bound;
        let xs = cumulative_bins(raw_w, MIN_BIN_WIDTH, span, tail_bound);
        let ys = cumulative_bins(raw_h, MIN_BIN_HEIGHT, span, tail_bound);

        // softplus(x + shift) + MIN_DERIVATIVE == 1 at x == 0, so a fresh
        // conditioner pins every knot derivative to exactly 1.
        let shift = ((1.0 - MIN_DERIVATIVE).exp() - 1.0).ln();
        let mut derivs = Vec::with_capacity(k + 1);
        derivs.push(1.0);
        for &d in raw_d {
            derivs.push(MIN_DERIVATIVE + softplus(d + shift));
        }
        derivs.push(1.0);

        Self { xs, ys, derivs, tail_bound }
    }

    /// Locate the segment containing `v` along the knot vector `knots`.
    fn segment(knots: &[f64], v: f64) -> usize {
        let k = knots.len() - 1;
        knots.partition_point(|&c| c <= v).saturating_sub(1).min(k - 1)
    }

    /// Forward transform `x -> (y, log|dy/dx|)`.
    pub fn forward(&self, x: f64) -> (f64, f64) {
        if x.abs() >= self.tail_bound {
            return (x, 0.0);
        }
        let i = Self::segment(&self.xs, x);
        let w = self.xs[i + 1] - self.xs[i];
        let h = self.ys[i + 1] - self.ys[i];
        let s = h / w;
        let d0 = self.derivs[i];
        let d1 = self.derivs[i + 1];

        let xi = (x - self.xs[i]) / w;
        let xi1 = 1.0 - xi;

        let denom = s + (d0 + d1 - 2.0 * s) * xi * xi1;
        let y = self.ys[i] + h * (s * xi * xi + d0 * xi * xi1) / denom;

        let num_deriv = s * s * (d1 * xi * xi + 2.0 * s * xi * xi1 + d0 * xi1 * xi1);
        let log_det = num_deriv.ln() - 2.0 * denom.ln();
        (y, log_det)
    }

    /// Inverse transform `y -> (x, log|dx/dy|)`.
    pub fn inverse(&self, y: f64) -> (f64, f64) {
        if y.abs() >= self.tail_bound {
            return (y, 0.0);
        }
        let i = Self::segment(&self.ys, y);
        let w = self.xs[i + 1] - self.xs[i];
        let h = self.ys[i + 1] - self.ys[i];
        let s = h / w;
        let d0 = self.derivs[i];
        let d1 = self.derivs[i + 1];

        let dy = y - self.ys[i];
        let t = d0 + d1 - 2.0 * s;
        let a = h * (s - d0) + dy * t;
        let b = h * d0 - dy * t;
        let c = -s * dy;

        let disc = (b * b - 4.0 * a * c).max(0.0);
        let xi = 2.0 * c / (-b - disc.sqrt());
        let xi = xi.clamp(0.0, 1.0);
        let xi1 = 1.0 - xi;
        let x = self.xs[i] + xi * w;

        let denom = s + t * xi * xi1;
        let num_deriv = s * s * (d1 * xi * xi + 2.0 * s * xi * xi1 + d0 * xi1 * xi1);
        let log_det = 2.0 * denom.ln() - num_deriv.ln();
        (x, log_det)
    }
}

/// Softmax the raw extents, apply the minimum share, and accumulate knots
/// from `-tail_bound` over a total span of `span`.
fn cumulative_bins(raw: &[f64], min_share: f64, span: f64, tail_bound: f64) -> Vec<f64> {
    let k = raw.len();
    let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut exps: Vec<f64> = raw.iter().map(|&v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    for e in exps.iter_mut() {
        *e = min_share + (1.0 - min_share * k as f64) * (*e / total);
    }

    let mut knots = Vec::with_capacity(k + 1);
    let mut acc = -tail_bound;
    knots.push(acc);
    for (idx, &share) in exps.iter().enumerate() {
        if idx == k - 1 {
            // Pin the last knot to the boundary exactly.
            knots.push(tail_bound);
        } else {
            acc += share * span;
            knots.push(acc);
        }
    }
    knots
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const B: f64 = 4.0;
    const K: usize = 8;

    fn random_raw(rng: &mut StdRng) -> Vec<f64> {
        (0..params_per_dim(K)).map(|_| rng.random::<f64>() * 2.0 - 1.0).collect()
    }

    #[test]
    fn test_zero_raw_is_identity() {
        let spline = Spline::from_raw(&vec![0.0; params_per_dim(K)], K, B);
        for &x in &[-3.9, -1.0, 0.0, 0.5, 2.7, 3.99] {
            let (y, ld) = spline.forward(x);
            assert_relative_eq!(y, x, epsilon = 1e-12);
            assert_relative_eq!(ld, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_identity_outside_tails() {
        let mut rng = StdRng::seed_from_u64(3);
        let spline = Spline::from_raw(&random_raw(&mut rng), K, B);
        for &x in &[-10.0, -4.0, 4.0, 7.5] {
            assert_eq!(spline.forward(x), (x, 0.0));
            assert_eq!(spline.inverse(x), (x, 0.0));
        }
    }

    #[test]
    fn test_forward_inverse_round_trip() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..20 {
            let spline = Spline::from_raw(&random_raw(&mut rng), K, B);
            for _ in 0..50 {
                let x = rng.random::<f64>() * 2.0 * B - B;
                let (y, ld_f) = spline.forward(x);
                let (back, ld_i) = spline.inverse(y);
                assert_relative_eq!(back, x, epsilon = 1e-9);
                // The inverse log-determinant is the negated forward one.
                assert_relative_eq!(ld_i, -ld_f, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_monotonic_and_support_preserving() {
        let mut rng = StdRng::seed_from_u64(5);
        let spline = Spline::from_raw(&random_raw(&mut rng), K, B);
        let mut prev = f64::NEG_INFINITY;
        for i in 0..200 {
            let x = -B + (i as f64 + 0.5) / 200.0 * 2.0 * B;
            let (y, _) = spline.forward(x);
            assert!(y > prev, "spline must be strictly increasing");
            assert!((-B..=B).contains(&y));
            prev = y;
        }
    }

    #[test]
    fn test_log_det_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(6);
        let spline = Spline::from_raw(&random_raw(&mut rng), K, B);
        let eps = 1e-6;
        for &x in &[-2.5, -0.3, 0.0, 1.1, 3.0] {
            let (_, ld) = spline.forward(x);
            let (y_plus, _) = spline.forward(x + eps);
            let (y_minus, _) = spline.forward(x - eps);
            let fd = ((y_plus - y_minus) / (2.0 * eps)).ln();
            assert_relative_eq!(ld, fd, epsilon = 1e-5);
        }
    }
}
