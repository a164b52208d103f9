//! Epoch-level callbacks: early stopping, best-model checkpointing, history

use crate::architectures::NodeModel;
use crate::config::{CheckpointConfig, EarlyStoppingConfig, Monitor};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Losses recorded at the end of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
    pub learning_rate: f64,
}

impl EpochRecord {
    /// Value of the monitored quantity
    pub fn monitored(&self, monitor: Monitor) -> f64 {
        match monitor {
            Monitor::ValidLoss => self.valid_loss,
            Monitor::TrainLoss => self.train_loss,
        }
    }
}

/// Per-epoch losses of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
    /// Epoch whose weights were kept, when a checkpoint was restored
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    pub fn train_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.train_loss).collect()
    }

    pub fn valid_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.valid_loss).collect()
    }
}

/// Stops training once the monitored loss stops improving
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    config: EarlyStoppingConfig,
    best: f64,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(config: EarlyStoppingConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Record an epoch; returns true when training should stop
    pub fn should_stop(&mut self, record: &EpochRecord) -> bool {
        let current = record.monitored(self.config.monitor);
        if current < self.best - self.config.min_delta {
            self.best = current;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        debug!(epoch = record.epoch, wait = self.wait, best = self.best, "no improvement");
        self.wait >= self.config.patience
    }
}

/// Keeps the best model seen so far, in memory and optionally on disk
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    config: CheckpointConfig,
    best: f64,
    best_epoch: Option<usize>,
    best_model: Option<NodeModel>,
}

impl ModelCheckpoint {
    pub fn new(config: CheckpointConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            best_epoch: None,
            best_model: None,
        }
    }

    /// Snapshot `model` if the epoch improved the monitored loss
    pub fn observe(&mut self, record: &EpochRecord, model: &NodeModel) -> Result<()> {
        let current = record.monitored(self.config.monitor);
        if current.is_finite() && current < self.best {
            self.best = current;
            self.best_epoch = Some(record.epoch);
            self.best_model = Some(model.clone());
            if let (Some(dir), Some(path)) = (&self.config.dir, self.file_path()) {
                std::fs::create_dir_all(dir)?;
                std::fs::write(&path, serde_json::to_string(model)?)?;
                debug!(epoch = record.epoch, path = %path.display(), "checkpoint written");
            }
        }
        Ok(())
    }

    /// Path of the best-model file, when a directory is configured
    pub fn file_path(&self) -> Option<PathBuf> {
        self.config.dir.as_ref().map(|d| d.join("best_model.json"))
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Best weights to restore, if restoring is enabled
    pub fn restore(self) -> Option<(usize, NodeModel)> {
        if !self.config.load_best {
            return None;
        }
        let epoch = self.best_epoch?;
        let model = self.best_model?;
        info!(epoch, loss = self.best, "restoring best checkpoint");
        Some((epoch, model))
    }
}
