//! Categorical embedding tables
//!
//! One table per categorical column with `cardinality + 1` rows; row 0
//! holds the vector for unknown or null categories.

use super::layers::dropout_mask;
use super::Parameterized;
use crate::error::{Result, TabularError};
use ndarray::{s, Array2, ArrayD, ArrayView1, ArrayViewMutD};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Per-column embedding lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingLayer {
    tables: Vec<Array2<f64>>,
    dropout: f64,
}

impl EmbeddingLayer {
    /// Create tables of the given `(rows, width)` shapes, N(0, 1) initialised
    pub fn new<R: Rng + ?Sized>(shapes: &[(usize, usize)], dropout: f64, rng: &mut R) -> Self {
        let tables = shapes
            .iter()
            .map(|&(rows, width)| {
                Array2::from_shape_fn((rows, width), |_| rng.sample::<f64, _>(StandardNormal))
            })
            .collect();
        Self { tables, dropout }
    }

    /// Total embedding width
    pub fn output_dim(&self) -> usize {
        self.tables.iter().map(|t| t.ncols()).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.tables.len()
    }

    /// Vector stored for `code` of column `column`
    pub fn vector(&self, column: usize, code: usize) -> Option<ArrayView1<'_, f64>> {
        self.tables
            .get(column)
            .filter(|t| code < t.nrows())
            .map(|t| t.row(code))
    }

    /// Look up every code; codes outside a table map to the unknown row
    pub fn forward(&self, codes: &Array2<usize>) -> Result<Array2<f64>> {
        if codes.ncols() != self.tables.len() {
            return Err(TabularError::ShapeError {
                expected: format!("{} categorical columns", self.tables.len()),
                actual: codes.ncols().to_string(),
            });
        }

        let mut out = Array2::zeros((codes.nrows(), self.output_dim()));
        let mut offset = 0;
        for (j, table) in self.tables.iter().enumerate() {
            let width = table.ncols();
            for (i, &code) in codes.column(j).iter().enumerate() {
                let row = if code < table.nrows() { code } else { 0 };
                out.slice_mut(s![i, offset..offset + width]).assign(&table.row(row));
            }
            offset += width;
        }
        Ok(out)
    }

    /// Forward with dropout; returns the mask for the backward pass
    pub fn forward_train<R: Rng + ?Sized>(
        &self,
        codes: &Array2<usize>,
        rng: &mut R,
    ) -> Result<(Array2<f64>, Option<Array2<f64>>)> {
        let out = self.forward(codes)?;
        if self.dropout > 0.0 {
            let mask = dropout_mask(out.dim(), self.dropout, rng);
            Ok((out * &mask, Some(mask)))
        } else {
            Ok((out, None))
        }
    }

    /// Accumulate row gradients for every table
    pub fn backward(
        &self,
        codes: &Array2<usize>,
        grad_output: &Array2<f64>,
        mask: Option<&Array2<f64>>,
    ) -> Vec<ArrayD<f64>> {
        let grad = match mask {
            Some(m) => grad_output * m,
            None => grad_output.clone(),
        };

        let mut offset = 0;
        self.tables
            .iter()
            .enumerate()
            .map(|(j, table)| {
                let width = table.ncols();
                let mut g = Array2::<f64>::zeros(table.raw_dim());
                for (i, &code) in codes.column(j).iter().enumerate() {
                    let row = if code < table.nrows() { code } else { 0 };
                    let mut target = g.row_mut(row);
                    target += &grad.slice(s![i, offset..offset + width]);
                }
                offset += width;
                g.into_dyn()
            })
            .collect()
    }
}

impl Parameterized for EmbeddingLayer {
    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        self.tables.iter_mut().map(|t| t.view_mut().into_dyn()).collect()
    }

    fn num_parameters(&self) -> usize {
        self.tables.iter().map(|t| t.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_lookup_and_unknown_row() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let layer = EmbeddingLayer::new(&[(4, 2), (3, 3)], 0.0, &mut rng);
        assert_eq!(layer.output_dim(), 5);

        let codes = array![[1usize, 2], [0, 0], [9, 1]];
        let out = layer.forward(&codes).unwrap();
        assert_eq!(out.dim(), (3, 5));
        assert_eq!(out.slice(s![0, 0..2]), layer.vector(0, 1).unwrap());
        // out-of-range code falls back to the unknown row
        assert_eq!(out.slice(s![2, 0..2]), layer.vector(0, 0).unwrap());
    }

    #[test]
    fn test_backward_accumulates_rows() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let layer = EmbeddingLayer::new(&[(3, 2)], 0.0, &mut rng);
        let codes = array![[1usize], [1], [2]];
        let grad = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let grads = layer.backward(&codes, &grad, None);
        let g = grads[0].view().into_dimensionality::<ndarray::Ix2>().unwrap();
        assert_eq!(g.row(1).to_vec(), vec![4.0, 6.0]);
        assert_eq!(g.row(2).to_vec(), vec![5.0, 6.0]);
        assert_eq!(g.row(0).to_vec(), vec![0.0, 0.0]);
    }
}
