//! Model configuration resolution
//!
//! [`ModelConfigResolver::resolve`] validates a data + model configuration
//! pair and produces an immutable [`ResolvedModelSpec`]. The spec is bound to
//! data-dependent sizes (category cardinalities, class counts) at fit time via
//! [`ResolvedModelSpec::architecture`].

use super::{AugTask, BinFunction, ChoiceFunction, DataConfig, NodeConfig, SslTask, TaskKind};
use crate::error::{Result, TabularError};
use crate::training::Metric;
use serde::{Deserialize, Serialize};

/// Upper bound on derived embedding widths
const MAX_EMBEDDING_DIM: usize = 50;

/// Self-supervised settings carried by a resolved ssl spec
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SslSettings {
    pub ssl_task: SslTask,
    pub aug_task: AugTask,
    pub aug_lambda: f64,
    pub temperature: f64,
}

/// Fully validated model specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedModelSpec {
    pub task: TaskKind,
    pub targets: Vec<String>,
    pub depth: usize,
    pub num_trees: usize,
    pub num_layers: usize,
    pub additional_tree_output_dim: usize,
    pub choice_function: ChoiceFunction,
    pub bin_function: BinFunction,
    pub input_dropout: f64,
    pub threshold_init_beta: f64,
    pub threshold_init_cutoff: f64,
    pub embed_categorical: bool,
    pub embedding_dims: Option<Vec<usize>>,
    pub embedding_dropout: f64,
    pub target_range: Option<Vec<(f64, f64)>>,
    pub ssl: Option<SslSettings>,
    pub metrics: Vec<Metric>,
}

/// Data-dependent sizes measured on the training split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSummary {
    /// Width of the dense input block (continuous + encoded categoricals)
    pub n_dense: usize,
    /// Distinct training categories per categorical column
    pub categorical_cardinalities: Vec<usize>,
    /// Number of classes (classification only)
    pub n_classes: Option<usize>,
    /// Width of the self-supervised reconstruction target
    pub reconstruction_dim: usize,
}

/// Concrete layer sizes for a NODE model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeArchitecture {
    pub n_dense: usize,
    /// (rows, width) per embedded categorical column; row 0 is the unknown slot
    pub embedding_shapes: Vec<(usize, usize)>,
    pub output_dim: usize,
    pub tree_dim: usize,
    pub depth: usize,
    pub num_trees: usize,
    pub num_layers: usize,
    pub choice_function: ChoiceFunction,
    pub bin_function: BinFunction,
    pub input_dropout: f64,
    pub embedding_dropout: f64,
    pub threshold_init_beta: f64,
    pub threshold_init_cutoff: f64,
}

impl NodeArchitecture {
    /// Width of the first tree layer input
    pub fn input_dim(&self) -> usize {
        self.n_dense + self.embedding_shapes.iter().map(|(_, d)| d).sum::<usize>()
    }
}

/// Validates configuration combinations
pub struct ModelConfigResolver;

impl ModelConfigResolver {
    /// Validate and resolve a model configuration against a data configuration
    pub fn resolve(data: &DataConfig, model: &NodeConfig) -> Result<ResolvedModelSpec> {
        data.validate()?;
        model.validate()?;

        let n_targets = data.target.len();
        match model.task {
            TaskKind::Regression if n_targets == 0 => {
                return Err(TabularError::ConfigError(
                    "regression requires at least one target column".to_string(),
                ));
            }
            TaskKind::Classification if n_targets != 1 => {
                return Err(TabularError::ConfigError(format!(
                    "classification requires exactly one target column, got {}",
                    n_targets
                )));
            }
            _ => {}
        }

        if let Some(ranges) = &model.target_range {
            if ranges.len() != n_targets {
                return Err(TabularError::ConfigError(format!(
                    "target_range has {} entries but {} target columns are configured",
                    ranges.len(),
                    n_targets
                )));
            }
        }

        if let Some(dims) = &model.embedding_dims {
            if !model.embed_categorical {
                return Err(TabularError::ConfigError(
                    "embedding_dims requires embed_categorical = true".to_string(),
                ));
            }
            if dims.len() != data.categorical_cols.len() {
                return Err(TabularError::ConfigError(format!(
                    "embedding_dims has {} entries but {} categorical columns are configured",
                    dims.len(),
                    data.categorical_cols.len()
                )));
            }
        }

        let ssl = match (model.task, model.ssl_task, model.aug_task) {
            (TaskKind::Ssl, Some(ssl_task), Some(aug_task)) => Some(SslSettings {
                ssl_task,
                aug_task,
                aug_lambda: model.aug_lambda,
                temperature: model.contrastive_temperature,
            }),
            _ => None,
        };

        let metrics = model
            .metrics
            .clone()
            .unwrap_or_else(|| Metric::defaults_for(model.task));

        Ok(ResolvedModelSpec {
            task: model.task,
            targets: data.target.clone(),
            depth: model.depth,
            num_trees: model.num_trees,
            num_layers: model.num_layers,
            additional_tree_output_dim: model.additional_tree_output_dim,
            choice_function: model.choice_function,
            bin_function: model.bin_function,
            input_dropout: model.input_dropout,
            threshold_init_beta: model.threshold_init_beta,
            threshold_init_cutoff: model.threshold_init_cutoff,
            embed_categorical: model.embed_categorical,
            embedding_dims: model.embedding_dims.clone(),
            embedding_dropout: model.embedding_dropout,
            target_range: model.target_range.clone(),
            ssl,
            metrics,
        })
    }
}

impl ResolvedModelSpec {
    /// Bind the resolved hyperparameters to measured data sizes
    pub fn architecture(&self, summary: &DataSummary) -> Result<NodeArchitecture> {
        let output_dim = match self.task {
            TaskKind::Regression => self.targets.len(),
            TaskKind::Classification => {
                let n_classes = summary.n_classes.unwrap_or(0);
                if n_classes < 2 {
                    return Err(TabularError::DataError(format!(
                        "classification target needs at least two classes, found {}",
                        n_classes
                    )));
                }
                n_classes
            }
            TaskKind::Ssl => summary.reconstruction_dim,
        };

        let embedding_shapes = if self.embed_categorical {
            summary
                .categorical_cardinalities
                .iter()
                .enumerate()
                .map(|(i, &cardinality)| {
                    let rows = cardinality + 1;
                    let width = match &self.embedding_dims {
                        Some(dims) => dims[i],
                        None => ((rows + 1) / 2).min(MAX_EMBEDDING_DIM),
                    };
                    (rows, width)
                })
                .collect()
        } else {
            Vec::new()
        };

        let architecture = NodeArchitecture {
            n_dense: summary.n_dense,
            embedding_shapes,
            output_dim,
            tree_dim: output_dim + self.additional_tree_output_dim,
            depth: self.depth,
            num_trees: self.num_trees,
            num_layers: self.num_layers,
            choice_function: self.choice_function,
            bin_function: self.bin_function,
            input_dropout: self.input_dropout,
            embedding_dropout: self.embedding_dropout,
            threshold_init_beta: self.threshold_init_beta,
            threshold_init_cutoff: self.threshold_init_cutoff,
        };

        if architecture.input_dim() == 0 {
            return Err(TabularError::DataError(
                "model input has zero width".to_string(),
            ));
        }

        Ok(architecture)
    }

    /// Names of the `test_*` keys produced by evaluation
    pub fn metric_keys(&self) -> Vec<String> {
        self.metrics.iter().map(|m| format!("test_{}", m.name())).collect()
    }
}
