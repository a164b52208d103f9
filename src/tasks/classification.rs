//! Classification: softmax over class logits, cross-entropy loss

use super::loss::{cross_entropy, softmax, Loss};
use super::{missing_targets, StepMode, StepOutput, TaskBehavior};
use crate::architectures::NodeModel;
use crate::config::{NodeArchitecture, ResolvedModelSpec, TaskKind};
use crate::data::{TabularBatch, Targets};
use crate::error::Result;
use crate::training::{EvaluationRecord, Metric, ModelMetrics};
use ndarray::Array2;
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ClassificationTask {
    target: String,
    n_classes: usize,
    metrics: Vec<Metric>,
}

impl ClassificationTask {
    pub fn new(spec: &ResolvedModelSpec, architecture: &NodeArchitecture) -> Self {
        Self {
            target: spec.targets.first().cloned().unwrap_or_default(),
            n_classes: architecture.output_dim,
            metrics: spec.metrics.clone(),
        }
    }

    fn classes<'a>(&self, batch: &'a TabularBatch) -> Result<&'a [Option<usize>]> {
        match &batch.targets {
            Targets::Classes(c) => Ok(c),
            _ => Err(missing_targets(TaskKind::Classification)),
        }
    }
}

/// Index of the largest value in every row
pub fn argmax_rows(values: &Array2<f64>) -> Vec<usize> {
    values
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}

impl TaskBehavior for ClassificationTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Classification
    }

    fn build_loss(&self) -> Loss {
        Loss::CrossEntropy
    }

    fn metric_keys(&self) -> Vec<String> {
        self.metrics.iter().map(|m| format!("test_{}", m.name())).collect()
    }

    fn postprocess_targets(&self, raw: &Array2<f64>) -> Array2<f64> {
        softmax(raw)
    }

    fn step(
        &self,
        model: &NodeModel,
        batch: &TabularBatch,
        mode: StepMode,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<StepOutput> {
        let classes = self.classes(batch)?;
        match mode {
            StepMode::Eval => {
                let logits = model.forward(&batch.dense, &batch.codes)?;
                Ok(StepOutput {
                    loss: cross_entropy(&logits, classes).0,
                    grads: None,
                })
            }
            StepMode::Train => {
                let (logits, cache) = model.forward_train(&batch.dense, &batch.codes, rng)?;
                let (loss, grad) = cross_entropy(&logits, classes);
                Ok(StepOutput {
                    loss,
                    grads: Some(model.backward(&grad, &cache)?),
                })
            }
        }
    }

    fn evaluate(&self, model: &NodeModel, data: &TabularBatch, _seed: u64) -> Result<Vec<EvaluationRecord>> {
        let classes = self.classes(data)?;
        let unseen = classes.iter().filter(|c| c.is_none()).count();
        if unseen > 0 {
            warn!(target_column = %self.target, rows = unseen, "evaluating rows with labels unseen during training");
        }

        let logits = model.forward(&data.dense, &data.codes)?;
        let (loss, _) = cross_entropy(&logits, classes);
        let predicted = argmax_rows(&logits);
        let computed = ModelMetrics::compute_classification(classes, &predicted, self.n_classes);

        let mut record = EvaluationRecord::new(Some(self.target.clone()));
        record.insert("test_loss", loss);
        for metric in &self.metrics {
            if let Some(value) = metric.value(&computed) {
                record.insert(format!("test_{}", metric.name()), value);
            }
        }
        Ok(vec![record])
    }
}
