//! Configuration objects
//!
//! Declarative, serde-serialisable descriptions of:
//! - the data schema ([`DataConfig`])
//! - the NODE model and its task ([`NodeConfig`])
//! - the optimizer ([`OptimizerConfig`])
//! - the training loop ([`TrainerConfig`])
//!
//! [`ModelConfigResolver`] is the single validation entry point that turns a
//! data + model configuration into a [`ResolvedModelSpec`].

mod data;
mod model;
mod optimizer;
mod resolver;
mod trainer;

pub use data::DataConfig;
pub use model::{AugTask, BinFunction, ChoiceFunction, NodeConfig, SslTask, TaskKind, MAX_DEPTH};
pub use optimizer::{LrScheduler, OptimizerConfig, OptimizerKind};
pub use resolver::{DataSummary, ModelConfigResolver, NodeArchitecture, ResolvedModelSpec, SslSettings};
pub use trainer::{CheckpointConfig, EarlyStoppingConfig, Monitor, TrainerConfig};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// All configuration needed to build and train a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub data: DataConfig,
    pub model: NodeConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
}

impl ExperimentConfig {
    /// Bundle the four configuration objects
    pub fn new(
        data: DataConfig,
        model: NodeConfig,
        optimizer: OptimizerConfig,
        trainer: TrainerConfig,
    ) -> Self {
        Self {
            data,
            model,
            optimizer,
            trainer,
        }
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        ModelConfigResolver::resolve(&self.data, &self.model)?;
        self.optimizer.validate()?;
        self.trainer.validate()
    }

    /// Load from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip_file() {
        let config = ExperimentConfig::new(
            DataConfig::new(["y"], ["a", "b"], ["c"]).unwrap(),
            NodeConfig::new(TaskKind::Ssl)
                .with_ssl_task(SslTask::Denoising)
                .with_aug_task(AugTask::Cutmix),
            OptimizerConfig::default(),
            TrainerConfig::default(),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");

        config.to_json_file(&path).unwrap();
        let loaded = ExperimentConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_optimizer_and_trainer_default_when_absent() {
        let json = r#"{
            "data": {
                "target": ["y"],
                "continuous_cols": ["a"],
                "categorical_cols": [],
                "continuous_feature_transform": null,
                "normalize_continuous_features": true
            },
            "model": {
                "task": "regression", "depth": 2, "num_trees": 8, "num_layers": 1,
                "additional_tree_output_dim": 3, "choice_function": "Sparsemax",
                "bin_function": "Sparsemoid", "input_dropout": 0.0,
                "threshold_init_beta": 1.0, "threshold_init_cutoff": 1.0,
                "embed_categorical": false, "embedding_dims": null,
                "embedding_dropout": 0.0, "target_range": null, "ssl_task": null,
                "aug_task": null, "aug_lambda": 0.1, "contrastive_temperature": 0.5,
                "metrics": null
            }
        }"#;
        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.optimizer, OptimizerConfig::default());
        assert_eq!(config.trainer, TrainerConfig::default());
        assert_eq!(config.model.choice_function, ChoiceFunction::Sparsemax);
    }
}
