//! Self-supervised pretraining: denoising reconstruction or contrastive InfoNCE

use super::augmentation::augment;
use super::loss::{info_nce, mse, Loss};
use super::{StepMode, StepOutput, TaskBehavior};
use crate::architectures::NodeModel;
use crate::config::{NodeArchitecture, ResolvedModelSpec, SslSettings, SslTask, TaskKind};
use crate::data::TabularBatch;
use crate::error::Result;
use crate::training::{EvaluationRecord, Metric, ModelMetrics};
use ndarray::{concatenate, Array1, Array2, ArrayD, Axis};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

#[derive(Debug, Clone)]
pub struct SelfSupervisedTask {
    settings: SslSettings,
    /// Training cardinality per embedded column, used to scale codes into the target
    cardinalities: Vec<usize>,
    metrics: Vec<Metric>,
}

impl SelfSupervisedTask {
    pub fn new(spec: &ResolvedModelSpec, settings: SslSettings, architecture: &NodeArchitecture) -> Self {
        Self {
            settings,
            cardinalities: architecture
                .embedding_shapes
                .iter()
                .map(|&(rows, _)| rows.saturating_sub(1).max(1))
                .collect(),
            metrics: spec.metrics.clone(),
        }
    }

    pub fn ssl_task(&self) -> SslTask {
        self.settings.ssl_task
    }

    /// Clean reconstruction target: dense features followed by scaled codes of embedded columns
    pub fn reconstruction_target(&self, batch: &TabularBatch) -> Result<Array2<f64>> {
        if self.cardinalities.is_empty() {
            return Ok(batch.dense.clone());
        }
        let scaled = Array2::from_shape_fn((batch.len(), self.cardinalities.len()), |(i, j)| {
            batch.codes[[i, j]] as f64 / self.cardinalities[j] as f64
        });
        Ok(concatenate(Axis(1), &[batch.dense.view(), scaled.view()])?)
    }

    fn view(&self, batch: &TabularBatch, rng: &mut Xoshiro256PlusPlus) -> (Array2<f64>, Array2<usize>) {
        augment(
            self.settings.aug_task,
            &batch.dense,
            &batch.codes,
            self.settings.aug_lambda,
            rng,
        )
    }

    fn record(&self, loss: f64, pred: &Array2<f64>, target: &Array2<f64>) -> EvaluationRecord {
        let flat_pred: Array1<f64> = pred.iter().copied().collect();
        let flat_target: Array1<f64> = target.iter().copied().collect();
        let computed = ModelMetrics::compute_regression(flat_target.view(), flat_pred.view());

        let mut record = EvaluationRecord::new(None);
        record.insert("test_loss", loss);
        for metric in &self.metrics {
            if let Some(value) = metric.value(&computed) {
                record.insert(format!("test_{}", metric.name()), value);
            }
        }
        record
    }
}

fn add_grads(mut a: Vec<ArrayD<f64>>, b: Vec<ArrayD<f64>>) -> Vec<ArrayD<f64>> {
    for (x, y) in a.iter_mut().zip(b) {
        *x += &y;
    }
    a
}

impl TaskBehavior for SelfSupervisedTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Ssl
    }

    fn build_loss(&self) -> Loss {
        match self.settings.ssl_task {
            SslTask::Denoising => Loss::MeanSquaredError,
            SslTask::Contrastive => Loss::InfoNce {
                temperature: self.settings.temperature,
            },
        }
    }

    fn metric_keys(&self) -> Vec<String> {
        self.metrics.iter().map(|m| format!("test_{}", m.name())).collect()
    }

    fn postprocess_targets(&self, raw: &Array2<f64>) -> Array2<f64> {
        raw.clone()
    }

    fn step(
        &self,
        model: &NodeModel,
        batch: &TabularBatch,
        mode: StepMode,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<StepOutput> {
        match (self.settings.ssl_task, mode) {
            (SslTask::Denoising, StepMode::Eval) => {
                let (dense, codes) = self.view(batch, rng);
                let out = model.forward(&dense, &codes)?;
                Ok(StepOutput {
                    loss: mse(&out, &self.reconstruction_target(batch)?).0,
                    grads: None,
                })
            }
            (SslTask::Denoising, StepMode::Train) => {
                let (dense, codes) = self.view(batch, rng);
                let (out, cache) = model.forward_train(&dense, &codes, rng)?;
                let (loss, grad) = mse(&out, &self.reconstruction_target(batch)?);
                Ok(StepOutput {
                    loss,
                    grads: Some(model.backward(&grad, &cache)?),
                })
            }
            (SslTask::Contrastive, StepMode::Eval) => {
                let (d1, c1) = self.view(batch, rng);
                let (d2, c2) = self.view(batch, rng);
                let z1 = model.forward(&d1, &c1)?;
                let z2 = model.forward(&d2, &c2)?;
                Ok(StepOutput {
                    loss: info_nce(&z1, &z2, self.settings.temperature).0,
                    grads: None,
                })
            }
            (SslTask::Contrastive, StepMode::Train) => {
                let (d1, c1) = self.view(batch, rng);
                let (d2, c2) = self.view(batch, rng);
                let (z1, cache1) = model.forward_train(&d1, &c1, rng)?;
                let (z2, cache2) = model.forward_train(&d2, &c2, rng)?;
                let (loss, dz1, dz2) = info_nce(&z1, &z2, self.settings.temperature);
                let grads = add_grads(model.backward(&dz1, &cache1)?, model.backward(&dz2, &cache2)?);
                Ok(StepOutput {
                    loss,
                    grads: Some(grads),
                })
            }
        }
    }

    fn evaluate(&self, model: &NodeModel, data: &TabularBatch, seed: u64) -> Result<Vec<EvaluationRecord>> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let (dense, codes) = self.view(data, &mut rng);
        let augmented = model.forward(&dense, &codes)?;

        let record = match self.settings.ssl_task {
            SslTask::Denoising => {
                let target = self.reconstruction_target(data)?;
                let loss = mse(&augmented, &target).0;
                self.record(loss, &augmented, &target)
            }
            SslTask::Contrastive => {
                let clean = model.forward(&data.dense, &data.codes)?;
                let loss = info_nce(&clean, &augmented, self.settings.temperature).0;
                self.record(loss, &augmented, &clean)
            }
        };
        Ok(vec![record])
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{architecture, dense, initialised_model};
    use super::*;
    use crate::config::{AugTask, DataConfig, ModelConfigResolver, NodeConfig};
    use crate::data::Targets;

    fn setup(ssl_task: SslTask, aug: AugTask) -> (SelfSupervisedTask, NodeModel, TabularBatch) {
        let data = TabularBatch {
            dense: dense(12, 2),
            codes: Array2::from_shape_fn((12, 1), |(i, _)| i % 3 + 1),
            targets: Targets::Unlabelled,
        };
        let spec = ModelConfigResolver::resolve(
            &DataConfig::new(Vec::<String>::new(), ["a", "b"], ["c"]).unwrap(),
            &NodeConfig::new(TaskKind::Ssl)
                .with_ssl_task(ssl_task)
                .with_aug_task(aug)
                .with_embed_categorical(true),
        )
        .unwrap();
        let arch = architecture(2, vec![(4, 2)], 3);
        let settings = spec.ssl.unwrap();
        let task = SelfSupervisedTask::new(&spec, settings, &arch);
        let model = initialised_model(arch, &data.dense, &data.codes);
        (task, model, data)
    }

    #[test]
    fn test_reconstruction_target_scales_codes() {
        let (task, _, data) = setup(SslTask::Denoising, AugTask::Cutmix);
        let target = task.reconstruction_target(&data).unwrap();
        assert_eq!(target.ncols(), 3);
        assert!((target[[2, 2]] - 1.0).abs() < 1e-12);
        assert!((target[[0, 2]] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_losses_follow_ssl_task() {
        let (denoising, _, _) = setup(SslTask::Denoising, AugTask::Mixup);
        assert_eq!(denoising.build_loss(), Loss::MeanSquaredError);
        let (contrastive, _, _) = setup(SslTask::Contrastive, AugTask::Mixup);
        assert!(matches!(contrastive.build_loss(), Loss::InfoNce { .. }));
    }

    #[test]
    fn test_train_steps_produce_gradients() {
        for ssl_task in [SslTask::Denoising, SslTask::Contrastive] {
            let (task, model, data) = setup(ssl_task, AugTask::Cutmix);
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
            let out = task.step(&model, &data, StepMode::Train, &mut rng).unwrap();
            assert!(out.loss.is_finite());
            assert!(out.grads.is_some());
        }
    }

    #[test]
    fn test_evaluate_is_deterministic_per_seed() {
        let (task, model, data) = setup(SslTask::Contrastive, AugTask::Mixup);
        let a = task.evaluate(&model, &data, 7).unwrap();
        let b = task.evaluate(&model, &data, 7).unwrap();
        assert_eq!(a, b);
        assert!(a[0].contains_key("test_mean_squared_error"));
        assert!(a[0].target.is_none());
    }
}
