//! Mini-batch training loop

use super::callbacks::{EarlyStopping, EpochRecord, ModelCheckpoint, TrainingHistory};
use super::optimizer::{clip_grad_norm, Optimizer};
use crate::architectures::{NodeModel, Parameterized};
use crate::config::{Monitor, OptimizerConfig, TrainerConfig};
use crate::data::TabularBatch;
use crate::error::{Result, TabularError};
use crate::tasks::{StepMode, TaskBehavior};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::time::Instant;
use tracing::{debug, info};

/// Drives a [`NodeModel`] through epochs of a task's training steps
#[derive(Debug)]
pub struct Trainer {
    config: TrainerConfig,
    optimizer: Optimizer,
}

impl Trainer {
    pub fn new(config: TrainerConfig, optimizer: OptimizerConfig) -> Self {
        Self {
            config,
            optimizer: Optimizer::new(optimizer),
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Initialise the model on the first batch, then train until a stop condition fires
    pub fn fit(
        &mut self,
        model: &mut NodeModel,
        task: &dyn TaskBehavior,
        train: &TabularBatch,
        valid: &TabularBatch,
    ) -> Result<TrainingHistory> {
        if train.is_empty() {
            return Err(TabularError::DataError("training split is empty".to_string()));
        }
        let start = Instant::now();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);
        let batch_size = self.config.batch_size;
        let fast_dev_run = self.config.fast_dev_run;

        let order = train.shuffled_order(&mut rng);
        let first_rows = &order[..batch_size.min(order.len())];
        let first = train.select(first_rows);
        model.initialize(&first.dense, &first.codes, &mut rng)?;

        let max_epochs = if fast_dev_run { 1 } else { self.config.max_epochs };
        let mut early_stopping = self.config.early_stopping.clone().map(EarlyStopping::new);
        let mut checkpoint = self.config.checkpoints.clone().map(ModelCheckpoint::new);
        let monitor = self
            .config
            .checkpoints
            .as_ref()
            .map(|c| c.monitor)
            .unwrap_or(Monitor::ValidLoss);
        let mut history = TrainingHistory::default();

        info!(
            task = %task.kind(),
            train_rows = train.len(),
            valid_rows = valid.len(),
            parameters = model.num_parameters(),
            max_epochs,
            "training started"
        );

        for epoch in 0..max_epochs {
            let train_loss = self.train_epoch(model, task, train, epoch, &mut rng)?;
            let valid_loss = if valid.is_empty() {
                train_loss
            } else {
                self.validate(model, task, valid, &mut rng)?
            };

            let record = EpochRecord {
                epoch,
                train_loss,
                valid_loss,
                learning_rate: self.optimizer.learning_rate(),
            };
            debug!(epoch, train_loss, valid_loss, lr = record.learning_rate, "epoch finished");

            self.optimizer.end_epoch(epoch, record.monitored(monitor));
            if let Some(cb) = checkpoint.as_mut() {
                cb.observe(&record, model)?;
            }
            let stop = match early_stopping.as_mut() {
                Some(cb) => cb.should_stop(&record) && epoch + 1 >= self.config.min_epochs,
                None => false,
            };
            history.epochs.push(record);

            if stop {
                info!(epoch, "early stopping");
                history.stopped_early = true;
                break;
            }
        }

        if let Some((epoch, best)) = checkpoint.and_then(|cb| cb.restore()) {
            *model = best;
            history.best_epoch = Some(epoch);
        }

        info!(
            epochs = history.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "training finished"
        );
        Ok(history)
    }

    fn train_epoch(
        &mut self,
        model: &mut NodeModel,
        task: &dyn TaskBehavior,
        train: &TabularBatch,
        epoch: usize,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<f64> {
        let order = train.shuffled_order(rng);
        let (mut total, mut rows) = (0.0, 0usize);

        for (i, batch) in train.batches(&order, self.config.batch_size).enumerate() {
            let out = task.step(model, &batch, StepMode::Train, rng)?;
            if !out.loss.is_finite() {
                return Err(TabularError::TrainingError(format!(
                    "non-finite loss {} at epoch {} batch {}",
                    out.loss, epoch, i
                )));
            }
            let mut grads = out.grads.ok_or_else(|| {
                TabularError::TrainingError("training step returned no gradients".to_string())
            })?;
            if let Some(max_norm) = self.config.gradient_clip_val {
                clip_grad_norm(&mut grads, max_norm);
            }
            self.optimizer.step(model.parameters_mut(), &grads)?;

            total += out.loss * batch.len() as f64;
            rows += batch.len();
            if self.config.fast_dev_run {
                break;
            }
        }
        Ok(total / rows.max(1) as f64)
    }

    fn validate(
        &self,
        model: &NodeModel,
        task: &dyn TaskBehavior,
        valid: &TabularBatch,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<f64> {
        let order: Vec<usize> = (0..valid.len()).collect();
        let (mut total, mut rows) = (0.0, 0usize);
        for batch in valid.batches(&order, self.config.batch_size) {
            let out = task.step(model, &batch, StepMode::Eval, rng)?;
            total += out.loss * batch.len() as f64;
            rows += batch.len();
            if self.config.fast_dev_run {
                break;
            }
        }
        Ok(total / rows.max(1) as f64)
    }
}
