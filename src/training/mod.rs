//! Model training
//!
//! The [`Trainer`] drives a NODE model through seeded, shuffled
//! mini-batches of a task's training steps, with:
//! - Adam, AdamW and SGD updates ([`Optimizer`])
//! - per-epoch learning-rate schedules
//! - early stopping and best-model checkpointing ([`callbacks`])
//! - evaluation metrics ([`Metric`], [`ModelMetrics`])

pub mod callbacks;
pub mod metrics;
pub mod optimizer;
pub mod trainer;

pub use callbacks::{EarlyStopping, EpochRecord, ModelCheckpoint, TrainingHistory};
pub use metrics::{EvaluationRecord, Metric, ModelMetrics};
pub use optimizer::{clip_grad_norm, Optimizer};
pub use trainer::Trainer;
