//! Kolosal Tabular - Neural Oblivious Decision Ensembles for tabular data
//!
//! This crate provides a configuration-driven deep-learning workflow for
//! tabular data built on the NODE architecture:
//! - Typed configuration objects with a single validation entry point
//! - Preprocessing: continuous transforms, scaling, categorical encoding
//! - Differentiable oblivious decision tree layers with learned embeddings
//! - Regression, classification and self-supervised tasks
//! - A training orchestrator with JSON persistence
//! - Learned categorical embeddings as a reusable transform
//!
//! # Modules
//!
//! ## Core
//! - [`config`] - Data, model, optimizer and trainer configuration
//! - [`preprocessing`] - Continuous transforms, scaling, encoders
//! - [`data`] - Schema validation, splitting and batching
//! - [`architectures`] - NODE layers and embeddings
//! - [`tasks`] - Task variants and losses
//! - [`training`] - Training loop, optimizers, callbacks, metrics
//!
//! ## Workflow
//! - [`tabular_model`] - Fit, evaluate, predict, save and load
//! - [`categorical_encoders`] - Categorical embedding extraction
//!
//! ## Services
//! - [`cli`] - Command-line interface
//! - [`utils`] - File loading and saving

// Core error handling
pub mod error;

// Core modules
pub mod architectures;
pub mod config;
pub mod data;
pub mod preprocessing;
pub mod tasks;
pub mod training;

// Workflow
pub mod categorical_encoders;
pub mod tabular_model;

// Services
pub mod cli;
pub mod utils;

pub use error::{ErrorKind, Result, TabularError};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{ErrorKind, Result, TabularError};

    // Configuration
    pub use crate::config::{
        AugTask, BinFunction, ChoiceFunction, CheckpointConfig, DataConfig, EarlyStoppingConfig,
        ExperimentConfig, LrScheduler, ModelConfigResolver, Monitor, NodeConfig, OptimizerConfig,
        OptimizerKind, ResolvedModelSpec, SslTask, TaskKind, TrainerConfig,
    };

    // Preprocessing
    pub use crate::preprocessing::ContinuousFeatureTransform;

    // Training
    pub use crate::training::{EvaluationRecord, Metric, TrainingHistory};

    // Workflow
    pub use crate::categorical_encoders::{
        CategoricalEmbeddingTransformer, CategoryKey, ColumnEmbedding, EmbeddingMapping,
    };
    pub use crate::tabular_model::TabularModel;

    // IO
    pub use crate::utils::{DataLoader, DataSaver};
}
