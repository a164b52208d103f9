//! Loss functions with analytic gradients w.r.t. model outputs

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Training objective of a task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Loss {
    MeanSquaredError,
    CrossEntropy,
    /// Contrastive InfoNCE over dot-product similarities
    InfoNce { temperature: f64 },
}

impl Loss {
    pub fn name(&self) -> &'static str {
        match self {
            Loss::MeanSquaredError => "mse",
            Loss::CrossEntropy => "cross_entropy",
            Loss::InfoNce { .. } => "info_nce",
        }
    }
}

/// Mean squared error over every element, with its gradient
pub fn mse(pred: &Array2<f64>, target: &Array2<f64>) -> (f64, Array2<f64>) {
    let n = pred.len().max(1) as f64;
    let diff = pred - target;
    let loss = diff.iter().map(|d| d * d).sum::<f64>() / n;
    (loss, diff * (2.0 / n))
}

/// Row-wise numerically stable softmax
pub fn softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    out
}

/// Mean cross-entropy over rows with a known class; unknown rows contribute nothing
pub fn cross_entropy(logits: &Array2<f64>, classes: &[Option<usize>]) -> (f64, Array2<f64>) {
    let probs = softmax(logits);
    let known = classes.iter().filter(|c| c.is_some()).count();
    let mut grad = Array2::<f64>::zeros(logits.raw_dim());
    if known == 0 {
        return (0.0, grad);
    }
    let n = known as f64;
    let mut loss = 0.0;
    for (i, class) in classes.iter().enumerate() {
        if let Some(c) = *class {
            loss -= probs[[i, c]].max(1e-12).ln();
            let mut g = grad.row_mut(i);
            g.assign(&probs.row(i));
            g[c] -= 1.0;
            g /= n;
        }
    }
    (loss / n, grad)
}

/// InfoNCE between paired views: row `i` of `z1` should match row `i` of `z2`
pub fn info_nce(z1: &Array2<f64>, z2: &Array2<f64>, temperature: f64) -> (f64, Array2<f64>, Array2<f64>) {
    let batch = z1.nrows();
    let logits = z1.dot(&z2.t()) / temperature;
    let probs = softmax(&logits);
    let b = batch.max(1) as f64;

    let loss = -(0..batch).map(|i| probs[[i, i]].max(1e-12).ln()).sum::<f64>() / b;

    let mut dlogits = probs;
    for i in 0..batch {
        dlogits[[i, i]] -= 1.0;
    }
    dlogits /= b;
    let dz1 = dlogits.dot(z2) / temperature;
    let dz2 = dlogits.t().dot(z1) / temperature;
    (loss, dz1, dz2)
}

/// Per-column mean squared error
pub fn column_mse(pred: &Array2<f64>, target: &Array2<f64>) -> Array1<f64> {
    let diff = pred - target;
    (&diff * &diff)
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(pred.ncols()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mse_gradient() {
        let (loss, grad) = mse(&array![[1.0, 2.0]], &array![[0.0, 0.0]]);
        assert!((loss - 2.5).abs() < 1e-12);
        assert_eq!(grad, array![[1.0, 2.0]]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let p = softmax(&array![[1000.0, 1000.0], [0.0, 2.0]]);
        for row in p.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!((p[[0, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_cross_entropy_skips_unknown_rows() {
        let logits = array![[2.0, 0.0], [0.0, 5.0]];
        let (loss, grad) = cross_entropy(&logits, &[Some(0), None]);
        let expected = -(softmax(&logits)[[0, 0]]).ln();
        assert!((loss - expected).abs() < 1e-12);
        assert!(grad.row(1).iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_info_nce_finite_difference() {
        let z1 = array![[0.3, -0.2], [0.1, 0.5], [-0.4, 0.2]];
        let z2 = array![[0.2, -0.1], [0.0, 0.4], [-0.5, 0.3]];
        let (_, dz1, _) = info_nce(&z1, &z2, 0.5);
        let eps = 1e-6;
        for i in 0..3 {
            for j in 0..2 {
                let mut plus = z1.clone();
                plus[[i, j]] += eps;
                let mut minus = z1.clone();
                minus[[i, j]] -= eps;
                let numeric = (info_nce(&plus, &z2, 0.5).0 - info_nce(&minus, &z2, 0.5).0) / (2.0 * eps);
                assert!((numeric - dz1[[i, j]]).abs() < 1e-6);
            }
        }
    }
}
