//! Regression: MSE on (optionally range-bounded) continuous targets

use super::loss::{column_mse, mse, Loss};
use super::{missing_targets, StepMode, StepOutput, TaskBehavior};
use crate::architectures::NodeModel;
use crate::config::{ResolvedModelSpec, TaskKind};
use crate::data::{TabularBatch, Targets};
use crate::error::Result;
use crate::training::{EvaluationRecord, Metric, ModelMetrics};
use ndarray::{Array2, Zip};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone)]
pub struct RegressionTask {
    targets: Vec<String>,
    target_range: Option<Vec<(f64, f64)>>,
    metrics: Vec<Metric>,
}

impl RegressionTask {
    pub fn new(spec: &ResolvedModelSpec) -> Self {
        Self {
            targets: spec.targets.clone(),
            target_range: spec.target_range.clone(),
            metrics: spec.metrics.clone(),
        }
    }

    fn targets<'a>(&self, batch: &'a TabularBatch) -> Result<&'a Array2<f64>> {
        match &batch.targets {
            Targets::Continuous(y) => Ok(y),
            _ => Err(missing_targets(TaskKind::Regression)),
        }
    }

    /// Chain the prediction gradient through the range activation
    fn output_gradient(&self, raw: &Array2<f64>, grad_pred: Array2<f64>) -> Array2<f64> {
        match &self.target_range {
            None => grad_pred,
            Some(ranges) => {
                let mut grad = grad_pred;
                for (j, (min, max)) in ranges.iter().enumerate() {
                    Zip::from(grad.column_mut(j))
                        .and(raw.column(j))
                        .for_each(|g, &o| {
                            let s = sigmoid(o);
                            *g *= s * (1.0 - s) * (max - min);
                        });
                }
                grad
            }
        }
    }
}

impl TaskBehavior for RegressionTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Regression
    }

    fn build_loss(&self) -> Loss {
        Loss::MeanSquaredError
    }

    fn metric_keys(&self) -> Vec<String> {
        self.metrics.iter().map(|m| format!("test_{}", m.name())).collect()
    }

    fn postprocess_targets(&self, raw: &Array2<f64>) -> Array2<f64> {
        match &self.target_range {
            None => raw.clone(),
            Some(ranges) => {
                let mut out = raw.clone();
                for (j, &(min, max)) in ranges.iter().enumerate() {
                    out.column_mut(j)
                        .mapv_inplace(|o| min + sigmoid(o) * (max - min));
                }
                out
            }
        }
    }

    fn step(
        &self,
        model: &NodeModel,
        batch: &TabularBatch,
        mode: StepMode,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<StepOutput> {
        let y = self.targets(batch)?;
        match mode {
            StepMode::Eval => {
                let pred = self.predict(model, batch)?;
                Ok(StepOutput {
                    loss: mse(&pred, y).0,
                    grads: None,
                })
            }
            StepMode::Train => {
                let (raw, cache) = model.forward_train(&batch.dense, &batch.codes, rng)?;
                let pred = self.postprocess_targets(&raw);
                let (loss, grad_pred) = mse(&pred, y);
                let grad_raw = self.output_gradient(&raw, grad_pred);
                let grads = model.backward(&grad_raw, &cache)?;
                Ok(StepOutput {
                    loss,
                    grads: Some(grads),
                })
            }
        }
    }

    fn evaluate(&self, model: &NodeModel, data: &TabularBatch, _seed: u64) -> Result<Vec<EvaluationRecord>> {
        let y = self.targets(data)?;
        let pred = self.predict(model, data)?;
        let losses = column_mse(&pred, y);

        let records = self
            .targets
            .par_iter()
            .enumerate()
            .map(|(j, name)| {
                let computed = ModelMetrics::compute_regression(y.column(j), pred.column(j));
                let mut record = EvaluationRecord::new(Some(name.clone()));
                record.insert("test_loss", losses[j]);
                for metric in &self.metrics {
                    if let Some(value) = metric.value(&computed) {
                        record.insert(format!("test_{}", metric.name()), value);
                    }
                }
                record
            })
            .collect();
        Ok(records)
    }
}
