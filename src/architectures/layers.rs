//! Sparse normalisers and sparse sigmoids used inside oblivious trees

use crate::config::{BinFunction, ChoiceFunction};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

/// Maps a score vector onto the probability simplex
pub trait SimplexProjection {
    /// Project `x` onto the simplex
    fn forward(&self, x: ArrayView1<f64>) -> Array1<f64>;

    /// Vector-Jacobian product given the forward output and upstream gradient
    fn backward(&self, output: ArrayView1<f64>, grad: ArrayView1<f64>) -> Array1<f64>;
}

/// Squashes a scalar into [0, 1]
pub trait BinActivation {
    fn forward(&self, x: f64) -> f64;

    /// Derivative expressed through the forward output
    fn derivative(&self, output: f64) -> f64;
}

/// Sparsemax activation function
///
/// Projects onto the probability simplex, producing sparse outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sparsemax;

impl SimplexProjection for Sparsemax {
    fn forward(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let mut sorted: Vec<f64> = x.to_vec();
        sorted.sort_by(|a, b| b.total_cmp(a));

        // Find the threshold
        let mut cumsum = 0.0;
        let mut k = 0;
        let mut support_sum = 0.0;
        for (i, &val) in sorted.iter().enumerate() {
            cumsum += val;
            if val > (cumsum - 1.0) / (i + 1) as f64 {
                k = i + 1;
                support_sum = cumsum;
            }
        }

        let tau = (support_sum - 1.0) / k.max(1) as f64;
        x.mapv(|xi| (xi - tau).max(0.0))
    }

    fn backward(&self, output: ArrayView1<f64>, grad: ArrayView1<f64>) -> Array1<f64> {
        let (sum, count) = output
            .iter()
            .zip(grad.iter())
            .filter(|(y, _)| **y > 0.0)
            .fold((0.0, 0usize), |(s, c), (_, g)| (s + g, c + 1));
        let mean = if count > 0 { sum / count as f64 } else { 0.0 };

        let mut dx = Array1::zeros(output.len());
        for ((d, &y), &g) in dx.iter_mut().zip(output.iter()).zip(grad.iter()) {
            if y > 0.0 {
                *d = g - mean;
            }
        }
        dx
    }
}

/// Exact 1.5-entmax via sorting
#[derive(Debug, Clone, Copy, Default)]
pub struct Entmax15;

impl SimplexProjection for Entmax15 {
    fn forward(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let max = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let z = x.mapv(|v| (v - max) / 2.0);

        let mut sorted: Vec<f64> = z.to_vec();
        sorted.sort_by(|a, b| b.total_cmp(a));

        let mut cumsum = 0.0;
        let mut cumsum_sq = 0.0;
        let mut tau_star = f64::NEG_INFINITY;
        for (i, &val) in sorted.iter().enumerate() {
            let rho = (i + 1) as f64;
            cumsum += val;
            cumsum_sq += val * val;
            let mean = cumsum / rho;
            let mean_sq = cumsum_sq / rho;
            let ss = rho * (mean_sq - mean * mean);
            let delta = ((1.0 - ss) / rho).max(0.0);
            let tau = mean - delta.sqrt();
            if tau <= val {
                tau_star = tau;
            }
        }

        z.mapv(|v| (v - tau_star).max(0.0).powi(2))
    }

    fn backward(&self, output: ArrayView1<f64>, grad: ArrayView1<f64>) -> Array1<f64> {
        let gppr = output.mapv(f64::sqrt);
        let mut dx = &grad * &gppr;
        let gppr_sum = gppr.sum();
        if gppr_sum > 0.0 {
            let q = dx.sum() / gppr_sum;
            dx.scaled_add(-q, &gppr);
        }
        dx
    }
}

/// `clamp(0.5 x + 0.5, 0, 1)`
#[derive(Debug, Clone, Copy, Default)]
pub struct Sparsemoid;

impl BinActivation for Sparsemoid {
    fn forward(&self, x: f64) -> f64 {
        (0.5 * x + 0.5).clamp(0.0, 1.0)
    }

    fn derivative(&self, output: f64) -> f64 {
        if output > 0.0 && output < 1.0 {
            0.5
        } else {
            0.0
        }
    }
}

/// Two-class 1.5-entmax: `entmax15([x, 0])[0]`
#[derive(Debug, Clone, Copy, Default)]
pub struct Entmoid15;

impl BinActivation for Entmoid15 {
    fn forward(&self, x: f64) -> f64 {
        let is_pos = x >= 0.0;
        let a = x.abs();
        let mut tau = (a + (8.0 - a * a).max(0.0).sqrt()) / 2.0;
        if tau <= a {
            tau = 2.0;
        }
        let y_neg = 0.25 * (tau - a).max(0.0).powi(2);
        if is_pos {
            1.0 - y_neg
        } else {
            y_neg
        }
    }

    fn derivative(&self, output: f64) -> f64 {
        let g0 = output.max(0.0).sqrt();
        let g1 = (1.0 - output).max(0.0).sqrt();
        if g0 + g1 > 0.0 {
            g0 * g1 / (g0 + g1)
        } else {
            0.0
        }
    }
}

impl SimplexProjection for ChoiceFunction {
    fn forward(&self, x: ArrayView1<f64>) -> Array1<f64> {
        match self {
            ChoiceFunction::Sparsemax => Sparsemax.forward(x),
            ChoiceFunction::Entmax15 => Entmax15.forward(x),
        }
    }

    fn backward(&self, output: ArrayView1<f64>, grad: ArrayView1<f64>) -> Array1<f64> {
        match self {
            ChoiceFunction::Sparsemax => Sparsemax.backward(output, grad),
            ChoiceFunction::Entmax15 => Entmax15.backward(output, grad),
        }
    }
}

impl BinActivation for BinFunction {
    fn forward(&self, x: f64) -> f64 {
        match self {
            BinFunction::Sparsemoid => Sparsemoid.forward(x),
            BinFunction::Entmoid15 => Entmoid15.forward(x),
        }
    }

    fn derivative(&self, output: f64) -> f64 {
        match self {
            BinFunction::Sparsemoid => Sparsemoid.derivative(output),
            BinFunction::Entmoid15 => Entmoid15.derivative(output),
        }
    }
}

/// Inverted dropout mask: 0 with probability `p`, otherwise `1 / (1 - p)`
pub fn dropout_mask<R: Rng + ?Sized>(shape: (usize, usize), p: f64, rng: &mut R) -> Array2<f64> {
    let keep = 1.0 / (1.0 - p);
    Array2::from_shape_fn(shape, |_| if rng.gen::<f64>() < p { 0.0 } else { keep })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn numeric_jacobian_check(f: &dyn SimplexProjection, x: Array1<f64>, grad: Array1<f64>) {
        let y = f.forward(x.view());
        let analytic = f.backward(y.view(), grad.view());
        let eps = 1e-6;
        for i in 0..x.len() {
            let mut xp = x.clone();
            xp[i] += eps;
            let mut xm = x.clone();
            xm[i] -= eps;
            let lp = f.forward(xp.view()).dot(&grad);
            let lm = f.forward(xm.view()).dot(&grad);
            let numeric = (lp - lm) / (2.0 * eps);
            assert!(
                (numeric - analytic[i]).abs() < 1e-4,
                "coordinate {}: numeric {} vs analytic {}",
                i,
                numeric,
                analytic[i]
            );
        }
    }

    #[test]
    fn test_sparsemax() {
        let out = Sparsemax.forward(array![2.0, 1.0, 0.1, -1.0].view());
        assert!((out.sum() - 1.0).abs() < 1e-9);
        assert!(out.iter().any(|&v| v == 0.0));
        assert!((out[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_entmax15_on_simplex() {
        let out = Entmax15.forward(array![0.5, 0.4, -3.0, 0.0].view());
        assert!((out.sum() - 1.0).abs() < 1e-9);
        assert_eq!(out[2], 0.0);
        assert!(out[0] > out[1] && out[1] > out[3]);

        let uniform = Entmax15.forward(array![1.0, 1.0, 1.0, 1.0].view());
        assert!(uniform.iter().all(|&v| (v - 0.25).abs() < 1e-9));
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let x = array![0.3, 0.1, -0.2, 0.25];
        let grad = array![1.0, -2.0, 0.5, 0.3];
        numeric_jacobian_check(&Sparsemax, x.clone(), grad.clone());
        numeric_jacobian_check(&Entmax15, x, grad);
    }

    #[test]
    fn test_bin_functions() {
        assert_eq!(Sparsemoid.forward(0.0), 0.5);
        assert_eq!(Sparsemoid.forward(5.0), 1.0);
        assert_eq!(Sparsemoid.forward(-5.0), 0.0);
        assert_eq!(Sparsemoid.derivative(1.0), 0.0);

        assert!((Entmoid15.forward(0.0) - 0.5).abs() < 1e-12);
        assert_eq!(Entmoid15.forward(3.0), 1.0);
        assert_eq!(Entmoid15.forward(-3.0), 0.0);
        assert!((Entmoid15.forward(0.7) + Entmoid15.forward(-0.7) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_dropout_mask_scale() {
        use rand::SeedableRng;
        let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(3);
        let mask = dropout_mask((200, 50), 0.2, &mut rng);
        assert!(mask.iter().all(|&m| m == 0.0 || (m - 1.25).abs() < 1e-12));
        assert!((mask.mean().unwrap() - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_entmoid_derivative() {
        for &x in &[-1.5, -0.3, 0.2, 1.1] {
            let eps = 1e-6;
            let numeric = (Entmoid15.forward(x + eps) - Entmoid15.forward(x - eps)) / (2.0 * eps);
            let analytic = Entmoid15.derivative(Entmoid15.forward(x));
            assert!((numeric - analytic).abs() < 1e-5, "x = {}", x);
        }
    }
}
