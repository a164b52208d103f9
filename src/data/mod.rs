//! Data preparation: schema validation, splitting and model-ready batches

pub mod batch;
pub mod datamodule;

pub use batch::{TabularBatch, Targets};
pub use datamodule::TabularDatamodule;
