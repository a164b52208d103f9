//! NODE model configuration

use crate::error::{Result, TabularError};
use crate::training::Metric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deepest tree allowed; each tree holds `2^depth` leaves
pub const MAX_DEPTH: usize = 16;

/// Learning objective category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Continuous targets, MSE loss
    Regression,
    /// Single categorical target, cross-entropy loss
    Classification,
    /// Label-free pretraining
    Ssl,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Regression => write!(f, "regression"),
            TaskKind::Classification => write!(f, "classification"),
            TaskKind::Ssl => write!(f, "ssl"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = TabularError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "regression" => Ok(TaskKind::Regression),
            "classification" => Ok(TaskKind::Classification),
            "ssl" | "self_supervised" => Ok(TaskKind::Ssl),
            other => Err(TabularError::invalid_parameter(
                "task",
                other,
                "expected regression, classification or ssl",
            )),
        }
    }
}

/// Self-supervised pretraining objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SslTask {
    /// Reconstruct the clean input from an augmented view
    Denoising,
    /// Pull two augmented views of a row together, push other rows apart
    Contrastive,
}

impl FromStr for SslTask {
    type Err = TabularError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "denoising" => Ok(SslTask::Denoising),
            "contrastive" => Ok(SslTask::Contrastive),
            other => Err(TabularError::invalid_parameter(
                "ssl_task",
                other,
                "expected Denoising or Contrastive",
            )),
        }
    }
}

/// Data perturbation used to build self-supervised views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AugTask {
    /// Swap individual cells with a partner row
    Cutmix,
    /// Interpolate towards a partner row
    Mixup,
}

impl FromStr for AugTask {
    type Err = TabularError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cutmix" => Ok(AugTask::Cutmix),
            "mixup" => Ok(AugTask::Mixup),
            other => Err(TabularError::invalid_parameter(
                "aug_task",
                other,
                "expected cutmix or mixup",
            )),
        }
    }
}

/// Sparse normaliser used to select features at each tree split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChoiceFunction {
    Sparsemax,
    Entmax15,
}

/// Sparse sigmoid used to route samples left/right at a split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinFunction {
    Sparsemoid,
    Entmoid15,
}

/// Configuration for the Neural Oblivious Decision Ensemble model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Learning objective
    pub task: TaskKind,

    /// Depth of every oblivious tree
    pub depth: usize,

    /// Number of trees per layer
    pub num_trees: usize,

    /// Number of densely connected tree layers
    pub num_layers: usize,

    /// Response channels per tree beyond the model output dimension
    pub additional_tree_output_dim: usize,

    pub choice_function: ChoiceFunction,
    pub bin_function: BinFunction,

    /// Dropout applied to every tree layer input while training
    pub input_dropout: f64,

    /// Beta(β, β) concentration for threshold initialisation percentiles
    pub threshold_init_beta: f64,

    /// Quantile of absolute deviations used to initialise temperatures
    pub threshold_init_cutoff: f64,

    /// Learn an embedding table per categorical column
    pub embed_categorical: bool,

    /// Embedding width per categorical column (None = derived from cardinality)
    pub embedding_dims: Option<Vec<usize>>,

    /// Dropout applied to embedding outputs while training
    pub embedding_dropout: f64,

    /// Per-target (min, max) bounds on regression outputs
    pub target_range: Option<Vec<(f64, f64)>>,

    /// Self-supervised objective (ssl only)
    pub ssl_task: Option<SslTask>,

    /// Augmentation strategy (ssl only)
    pub aug_task: Option<AugTask>,

    /// Augmentation strength in [0, 1]
    pub aug_lambda: f64,

    /// Similarity temperature for the contrastive objective
    pub contrastive_temperature: f64,

    /// Metrics reported by evaluate (None = task default)
    pub metrics: Option<Vec<Metric>>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            task: TaskKind::Regression,
            depth: 6,
            num_trees: 2048,
            num_layers: 1,
            additional_tree_output_dim: 3,
            choice_function: ChoiceFunction::Entmax15,
            bin_function: BinFunction::Entmoid15,
            input_dropout: 0.0,
            threshold_init_beta: 1.0,
            threshold_init_cutoff: 1.0,
            embed_categorical: false,
            embedding_dims: None,
            embedding_dropout: 0.0,
            target_range: None,
            ssl_task: None,
            aug_task: None,
            aug_lambda: 0.1,
            contrastive_temperature: 0.5,
            metrics: None,
        }
    }
}

impl NodeConfig {
    /// Create a configuration for the given task with default hyperparameters
    pub fn new(task: TaskKind) -> Self {
        Self {
            task,
            ..Default::default()
        }
    }

    /// Builder method to set tree depth
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Builder method to set trees per layer
    pub fn with_num_trees(mut self, num_trees: usize) -> Self {
        self.num_trees = num_trees;
        self
    }

    /// Builder method to set the number of layers
    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Builder method to toggle categorical embeddings
    pub fn with_embed_categorical(mut self, embed: bool) -> Self {
        self.embed_categorical = embed;
        self
    }

    /// Builder method to set explicit embedding widths
    pub fn with_embedding_dims(mut self, dims: Vec<usize>) -> Self {
        self.embedding_dims = Some(dims);
        self
    }

    /// Builder method to set per-target output bounds
    pub fn with_target_range(mut self, range: Vec<(f64, f64)>) -> Self {
        self.target_range = Some(range);
        self
    }

    /// Builder method to set the self-supervised objective
    pub fn with_ssl_task(mut self, task: SslTask) -> Self {
        self.ssl_task = Some(task);
        self
    }

    /// Builder method to set the augmentation strategy
    pub fn with_aug_task(mut self, task: AugTask) -> Self {
        self.aug_task = Some(task);
        self
    }

    /// Builder method to set the choice and bin functions
    pub fn with_functions(mut self, choice: ChoiceFunction, bin: BinFunction) -> Self {
        self.choice_function = choice;
        self.bin_function = bin;
        self
    }

    /// Builder method to set reported metrics
    pub fn with_metrics(mut self, metrics: Vec<Metric>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Checks that do not depend on the data configuration
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("depth", self.depth),
            ("num_trees", self.num_trees),
            ("num_layers", self.num_layers),
        ] {
            if value == 0 {
                return Err(TabularError::invalid_parameter(name, value, "must be positive"));
            }
        }
        if self.depth > MAX_DEPTH {
            return Err(TabularError::invalid_parameter(
                "depth",
                self.depth,
                format!("must be at most {}", MAX_DEPTH),
            ));
        }

        for (name, value) in [
            ("input_dropout", self.input_dropout),
            ("embedding_dropout", self.embedding_dropout),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(TabularError::invalid_parameter(name, value, "must lie in [0, 1)"));
            }
        }

        if !(self.threshold_init_beta > 0.0) {
            return Err(TabularError::invalid_parameter(
                "threshold_init_beta",
                self.threshold_init_beta,
                "must be positive",
            ));
        }
        if !(self.threshold_init_cutoff > 0.0) {
            return Err(TabularError::invalid_parameter(
                "threshold_init_cutoff",
                self.threshold_init_cutoff,
                "must be positive",
            ));
        }

        match self.task {
            TaskKind::Ssl => {
                if self.ssl_task.is_none() || self.aug_task.is_none() {
                    return Err(TabularError::ConfigError(
                        "task 'ssl' requires both ssl_task and aug_task".to_string(),
                    ));
                }
                if !(0.0..=1.0).contains(&self.aug_lambda) {
                    return Err(TabularError::invalid_parameter(
                        "aug_lambda",
                        self.aug_lambda,
                        "must lie in [0, 1]",
                    ));
                }
                if !(self.contrastive_temperature > 0.0) {
                    return Err(TabularError::invalid_parameter(
                        "contrastive_temperature",
                        self.contrastive_temperature,
                        "must be positive",
                    ));
                }
            }
            task => {
                if self.ssl_task.is_some() || self.aug_task.is_some() {
                    return Err(TabularError::ConfigError(format!(
                        "ssl_task and aug_task are only valid for task 'ssl', got '{}'",
                        task
                    )));
                }
            }
        }

        if let Some(ranges) = &self.target_range {
            if self.task != TaskKind::Regression {
                return Err(TabularError::ConfigError(format!(
                    "target_range is only valid for regression, got '{}'",
                    self.task
                )));
            }
            for (i, (min, max)) in ranges.iter().enumerate() {
                if !min.is_finite() || !max.is_finite() || min > max {
                    return Err(TabularError::invalid_parameter(
                        format!("target_range[{}]", i),
                        format!("({}, {})", min, max),
                        "bounds must be finite with min <= max",
                    ));
                }
            }
        }

        if let Some(dims) = &self.embedding_dims {
            if let Some(pos) = dims.iter().position(|&d| d == 0) {
                return Err(TabularError::invalid_parameter(
                    format!("embedding_dims[{}]", pos),
                    0,
                    "must be positive",
                ));
            }
        }

        if let Some(metrics) = &self.metrics {
            if metrics.is_empty() {
                return Err(TabularError::ConfigError("metrics must not be empty".to_string()));
            }
            for metric in metrics {
                if !metric.supports(self.task) {
                    return Err(TabularError::ConfigError(format!(
                        "metric '{}' is not available for task '{}'",
                        metric.name(),
                        self.task
                    )));
                }
            }
        }

        Ok(())
    }
}
