//! Evaluation metrics and records

use crate::config::TaskKind;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric reported by `evaluate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    MeanSquaredError,
    MeanAbsoluteError,
    R2Score,
    Accuracy,
    /// Macro-averaged F1 over classes
    F1Score,
}

impl Metric {
    /// Name used in `test_<name>` record keys
    pub fn name(&self) -> &'static str {
        match self {
            Metric::MeanSquaredError => "mean_squared_error",
            Metric::MeanAbsoluteError => "mean_absolute_error",
            Metric::R2Score => "r2_score",
            Metric::Accuracy => "accuracy",
            Metric::F1Score => "f1_score",
        }
    }

    /// Whether the metric can be computed for a task
    pub fn supports(&self, task: TaskKind) -> bool {
        match self {
            Metric::MeanSquaredError | Metric::MeanAbsoluteError | Metric::R2Score => {
                matches!(task, TaskKind::Regression | TaskKind::Ssl)
            }
            Metric::Accuracy | Metric::F1Score => task == TaskKind::Classification,
        }
    }

    /// Metrics reported when none are configured
    pub fn defaults_for(task: TaskKind) -> Vec<Metric> {
        match task {
            TaskKind::Classification => vec![Metric::Accuracy],
            TaskKind::Regression | TaskKind::Ssl => vec![Metric::MeanSquaredError],
        }
    }

    /// Pick this metric out of computed model metrics
    pub fn value(&self, metrics: &ModelMetrics) -> Option<f64> {
        match self {
            Metric::MeanSquaredError => metrics.mse,
            Metric::MeanAbsoluteError => metrics.mae,
            Metric::R2Score => metrics.r2,
            Metric::Accuracy => metrics.accuracy,
            Metric::F1Score => metrics.f1_score,
        }
    }
}

/// Metrics for model evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Accuracy (classification)
    pub accuracy: Option<f64>,
    /// Macro F1 score (classification)
    pub f1_score: Option<f64>,
    /// Mean Squared Error (regression)
    pub mse: Option<f64>,
    /// Mean Absolute Error (regression)
    pub mae: Option<f64>,
    /// R-squared (regression)
    pub r2: Option<f64>,
    /// Number of evaluated samples
    pub n_samples: usize,
}

impl ModelMetrics {
    /// Compute classification metrics from class indices.
    /// `None` in `y_true` marks a label never seen in training; it counts as wrong.
    pub fn compute_classification(
        y_true: &[Option<usize>],
        y_pred: &[usize],
        n_classes: usize,
    ) -> Self {
        let n = y_true.len();
        let mut metrics = Self {
            n_samples: n,
            ..Default::default()
        };
        if n == 0 {
            return metrics;
        }

        let correct = y_true
            .iter()
            .zip(y_pred)
            .filter(|(t, p)| **t == Some(**p))
            .count();
        metrics.accuracy = Some(correct as f64 / n as f64);

        let mut f1_sum = 0.0;
        for class in 0..n_classes {
            let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
            for (t, &p) in y_true.iter().zip(y_pred) {
                match (*t == Some(class), p == class) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }
            let denom = 2 * tp + fp + fn_;
            if denom > 0 {
                f1_sum += 2.0 * tp as f64 / denom as f64;
            }
        }
        metrics.f1_score = Some(if n_classes > 0 {
            f1_sum / n_classes as f64
        } else {
            0.0
        });

        metrics
    }

    /// Compute regression metrics
    pub fn compute_regression(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> Self {
        let n = y_true.len();
        let mut metrics = Self {
            n_samples: n,
            ..Default::default()
        };
        if n == 0 {
            return metrics;
        }
        let n_f = n as f64;

        let errors: Vec<f64> = y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| t - p)
            .collect();

        let ss_res: f64 = errors.iter().map(|e| e * e).sum();
        metrics.mse = Some(ss_res / n_f);
        metrics.mae = Some(errors.iter().map(|e| e.abs()).sum::<f64>() / n_f);

        let y_mean = y_true.sum() / n_f;
        let ss_tot: f64 = y_true.iter().map(|y| (y - y_mean).powi(2)).sum();
        metrics.r2 = Some(if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 });

        metrics
    }
}

/// One evaluation result: a target (for per-target regression records) and
/// its `test_*` metric values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub target: Option<String>,
    pub metrics: BTreeMap<String, f64>,
}

impl EvaluationRecord {
    pub fn new(target: Option<String>) -> Self {
        Self {
            target,
            metrics: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.metrics.insert(key.into(), value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(|k| k.as_str())
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.metrics.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_classification_metrics() {
        let y_true = [Some(1), Some(0), Some(1), Some(1), Some(0), Some(1), Some(0), Some(0)];
        let y_pred = [1, 0, 1, 0, 0, 1, 1, 0];

        let metrics = ModelMetrics::compute_classification(&y_true, &y_pred, 2);
        assert_eq!(metrics.accuracy, Some(0.75));
        assert!((metrics.f1_score.unwrap() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_unseen_labels_count_as_wrong() {
        let metrics = ModelMetrics::compute_classification(&[Some(0), None], &[0, 0], 2);
        assert_eq!(metrics.accuracy, Some(0.5));
    }

    #[test]
    fn test_regression_metrics() {
        let y_true = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let y_pred = array![1.1, 2.0, 2.9, 4.1, 5.0];

        let metrics = ModelMetrics::compute_regression(y_true.view(), y_pred.view());

        assert!((metrics.mse.unwrap() - 0.006).abs() < 1e-9);
        assert!((metrics.mae.unwrap() - 0.06).abs() < 1e-9);
        assert!(metrics.r2.unwrap() > 0.9);
    }

    #[test]
    fn test_metric_names_and_support() {
        assert_eq!(Metric::MeanSquaredError.name(), "mean_squared_error");
        assert!(Metric::MeanSquaredError.supports(TaskKind::Ssl));
        assert!(!Metric::Accuracy.supports(TaskKind::Regression));
        assert_eq!(Metric::defaults_for(TaskKind::Classification), vec![Metric::Accuracy]);
    }

    #[test]
    fn test_evaluation_record() {
        let mut record = EvaluationRecord::new(Some("y".to_string()));
        record.insert("test_mean_squared_error", 0.5);
        assert!(record.contains_key("test_mean_squared_error"));
        assert_eq!(record.get("test_mean_squared_error"), Some(0.5));
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["test_mean_squared_error"]);
    }
}
