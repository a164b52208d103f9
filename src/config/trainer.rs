//! Training loop configuration

use crate::error::{Result, TabularError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Quantity watched by early stopping and checkpointing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    ValidLoss,
    TrainLoss,
}

/// Early stopping policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStoppingConfig {
    pub monitor: Monitor,
    /// Minimum decrease that counts as an improvement
    pub min_delta: f64,
    /// Epochs without improvement before stopping
    pub patience: usize,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            monitor: Monitor::ValidLoss,
            min_delta: 0.001,
            patience: 3,
        }
    }
}

/// Checkpoint policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub monitor: Monitor,
    /// Directory for the best checkpoint file (None = keep in memory only)
    pub dir: Option<PathBuf>,
    /// Restore the best weights when training ends
    pub load_best: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            monitor: Monitor::ValidLoss,
            dir: None,
            load_best: true,
        }
    }
}

/// Configuration for the training loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Maximum number of epochs
    pub max_epochs: usize,

    /// Epochs to run before early stopping may trigger
    pub min_epochs: usize,

    /// Rows per mini-batch
    pub batch_size: usize,

    /// Fraction of the training frame held out for validation
    pub validation_split: f64,

    /// Run a single train and validation batch, then stop
    pub fast_dev_run: bool,

    /// Requested GPU count (only CPU execution is available)
    pub gpus: Option<usize>,

    /// Seed for splitting, shuffling, initialisation and augmentation
    pub seed: u64,

    pub early_stopping: Option<EarlyStoppingConfig>,
    pub checkpoints: Option<CheckpointConfig>,

    /// Clip the global gradient norm to this value
    pub gradient_clip_val: Option<f64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 10,
            min_epochs: 1,
            batch_size: 64,
            validation_split: 0.2,
            fast_dev_run: false,
            gpus: None,
            seed: 42,
            early_stopping: Some(EarlyStoppingConfig::default()),
            checkpoints: Some(CheckpointConfig::default()),
            gradient_clip_val: None,
        }
    }
}

impl TrainerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set max epochs
    pub fn with_max_epochs(mut self, epochs: usize) -> Self {
        self.max_epochs = epochs;
        self
    }

    /// Builder method to set batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Builder method to toggle fast dev run
    pub fn with_fast_dev_run(mut self, fast_dev_run: bool) -> Self {
        self.fast_dev_run = fast_dev_run;
        self
    }

    /// Builder method to set early stopping (None disables it)
    pub fn with_early_stopping(mut self, early_stopping: Option<EarlyStoppingConfig>) -> Self {
        self.early_stopping = early_stopping;
        self
    }

    /// Builder method to set checkpointing (None disables it)
    pub fn with_checkpoints(mut self, checkpoints: Option<CheckpointConfig>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Builder method to request GPUs
    pub fn with_gpus(mut self, gpus: Option<usize>) -> Self {
        self.gpus = gpus;
        self
    }

    /// Builder method to set the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builder method to set the validation fraction
    pub fn with_validation_split(mut self, split: f64) -> Self {
        self.validation_split = split;
        self
    }

    /// Builder method to set gradient clipping
    pub fn with_gradient_clip_val(mut self, clip: f64) -> Self {
        self.gradient_clip_val = Some(clip);
        self
    }

    /// Check loop-control invariants
    pub fn validate(&self) -> Result<()> {
        if self.max_epochs == 0 {
            return Err(TabularError::invalid_parameter("max_epochs", 0, "must be positive"));
        }
        if self.min_epochs > self.max_epochs {
            return Err(TabularError::invalid_parameter(
                "min_epochs",
                self.min_epochs,
                format!("must not exceed max_epochs ({})", self.max_epochs),
            ));
        }
        if self.batch_size == 0 {
            return Err(TabularError::invalid_parameter("batch_size", 0, "must be positive"));
        }
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(TabularError::invalid_parameter(
                "validation_split",
                self.validation_split,
                "must lie in (0, 1)",
            ));
        }
        if let Some(clip) = self.gradient_clip_val {
            if !(clip > 0.0) {
                return Err(TabularError::invalid_parameter(
                    "gradient_clip_val",
                    clip,
                    "must be positive",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrainerConfig::default();
        assert_eq!(config.max_epochs, 10);
        assert_eq!(config.validation_split, 0.2);
        assert!(config.early_stopping.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = TrainerConfig::new()
            .with_max_epochs(1)
            .with_checkpoints(None)
            .with_early_stopping(None)
            .with_gpus(None)
            .with_fast_dev_run(true);
        assert_eq!(config.max_epochs, 1);
        assert!(config.checkpoints.is_none());
        assert!(config.early_stopping.is_none());
        assert!(config.fast_dev_run);
    }

    #[test]
    fn test_invalid_values() {
        assert!(TrainerConfig::new().with_max_epochs(0).validate().is_err());
        assert!(TrainerConfig::new().with_batch_size(0).validate().is_err());
        assert!(TrainerConfig::new().with_validation_split(1.0).validate().is_err());
    }
}
