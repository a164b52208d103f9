//! Neural architectures for tabular data
//!
//! NODE (Neural Oblivious Decision Ensembles): layers of differentiable
//! oblivious decision trees with sparse feature selection (sparsemax or
//! 1.5-entmax) and sparse routing (sparsemoid or 1.5-entmoid), plus learned
//! categorical embeddings. Forward and backward passes are written against
//! `ndarray`; per-sample work runs on the rayon pool.

pub mod embedding;
pub mod layers;
pub mod node;
pub mod odst;

pub use embedding::EmbeddingLayer;
pub use layers::{BinActivation, Entmax15, Entmoid15, SimplexProjection, Sparsemax, Sparsemoid};
pub use node::{NodeCache, NodeModel};
pub use odst::OdstLayer;

use ndarray::ArrayViewMutD;

/// A component with trainable parameters
pub trait Parameterized {
    /// Mutable views of every parameter, in a fixed order
    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>>;

    /// Total number of scalar parameters
    fn num_parameters(&self) -> usize;
}
