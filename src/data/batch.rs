//! In-memory model inputs and mini-batching

use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

/// Encoded targets of a set of rows
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    /// Regression targets, `[rows, n_targets]`
    Continuous(Array2<f64>),
    /// Class indices; `None` marks a label unseen during training
    Classes(Vec<Option<usize>>),
    /// No targets (self-supervised data or inference input)
    Unlabelled,
}

impl Targets {
    fn select(&self, indices: &[usize]) -> Targets {
        match self {
            Targets::Continuous(y) => Targets::Continuous(y.select(Axis(0), indices)),
            Targets::Classes(c) => Targets::Classes(indices.iter().map(|&i| c[i]).collect()),
            Targets::Unlabelled => Targets::Unlabelled,
        }
    }
}

/// Model-ready rows: dense features, categorical codes and targets
#[derive(Debug, Clone, PartialEq)]
pub struct TabularBatch {
    /// `[rows, n_dense]` scaled continuous (and encoded categorical) features
    pub dense: Array2<f64>,
    /// `[rows, n_categorical]` ordinal codes, 0 = unknown
    pub codes: Array2<usize>,
    pub targets: Targets,
}

impl TabularBatch {
    pub fn len(&self) -> usize {
        self.dense.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows at `indices`, in order
    pub fn select(&self, indices: &[usize]) -> TabularBatch {
        TabularBatch {
            dense: self.dense.select(Axis(0), indices),
            codes: self.codes.select(Axis(0), indices),
            targets: self.targets.select(indices),
        }
    }

    /// Split into consecutive mini-batches following `order`
    pub fn batches<'a>(
        &'a self,
        order: &'a [usize],
        batch_size: usize,
    ) -> impl Iterator<Item = TabularBatch> + 'a {
        order.chunks(batch_size.max(1)).map(move |chunk| self.select(chunk))
    }

    /// A shuffled row order
    pub fn shuffled_order<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        order
    }
}
