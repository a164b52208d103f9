//! NODE: densely connected ODST layers with an averaging head

use super::embedding::EmbeddingLayer;
use super::layers::dropout_mask;
use super::odst::{OdstCache, OdstLayer};
use super::Parameterized;
use crate::config::NodeArchitecture;
use crate::error::{Result, TabularError};
use ndarray::{concatenate, s, Array2, ArrayD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Intermediates of a training forward pass
#[derive(Debug, Clone)]
pub struct NodeCache {
    codes: Array2<usize>,
    embedding_mask: Option<Array2<f64>>,
    input_masks: Vec<Option<Array2<f64>>>,
    layer_caches: Vec<OdstCache>,
}

/// Neural Oblivious Decision Ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeModel {
    architecture: NodeArchitecture,
    embedding: Option<EmbeddingLayer>,
    layers: Vec<OdstLayer>,
}

impl NodeModel {
    /// Build an uninitialised model for the given architecture
    pub fn new<R: Rng + ?Sized>(architecture: NodeArchitecture, rng: &mut R) -> Self {
        let embedding = if architecture.embedding_shapes.is_empty() {
            None
        } else {
            Some(EmbeddingLayer::new(
                &architecture.embedding_shapes,
                architecture.embedding_dropout,
                rng,
            ))
        };

        let input_dim = architecture.input_dim();
        let layer_out = architecture.num_trees * architecture.tree_dim;
        let layers = (0..architecture.num_layers)
            .map(|l| {
                OdstLayer::new(
                    input_dim + l * layer_out,
                    architecture.num_trees,
                    architecture.depth,
                    architecture.tree_dim,
                    architecture.choice_function,
                    architecture.bin_function,
                    rng,
                )
            })
            .collect();

        Self {
            architecture,
            embedding,
            layers,
        }
    }

    pub fn architecture(&self) -> &NodeArchitecture {
        &self.architecture
    }

    pub fn embedding(&self) -> Option<&EmbeddingLayer> {
        self.embedding.as_ref()
    }

    pub fn output_dim(&self) -> usize {
        self.architecture.output_dim
    }

    fn build_input(&self, dense: &Array2<f64>, embedded: Option<Array2<f64>>) -> Result<Array2<f64>> {
        if dense.ncols() != self.architecture.n_dense {
            return Err(TabularError::ShapeError {
                expected: format!("{} dense features", self.architecture.n_dense),
                actual: dense.ncols().to_string(),
            });
        }
        match embedded {
            Some(e) => Ok(concatenate(Axis(1), &[dense.view(), e.view()])?),
            None => Ok(dense.clone()),
        }
    }

    /// Data-aware initialisation of every tree layer on one batch
    pub fn initialize<R: Rng + ?Sized>(
        &mut self,
        dense: &Array2<f64>,
        codes: &Array2<usize>,
        rng: &mut R,
    ) -> Result<()> {
        let embedded = match &self.embedding {
            Some(e) => Some(e.forward(codes)?),
            None => None,
        };
        let mut input = self.build_input(dense, embedded)?;
        let beta = self.architecture.threshold_init_beta;
        let cutoff = self.architecture.threshold_init_cutoff;

        for layer in self.layers.iter_mut() {
            layer.initialize(&input, beta, cutoff, rng)?;
            let out = layer.forward(&input)?;
            input = concatenate(Axis(1), &[input.view(), out.view()])?;
        }
        debug!(
            batch = dense.nrows(),
            layers = self.layers.len(),
            "data-aware tree initialisation done"
        );
        Ok(())
    }

    /// Inference forward pass: `[batch, output_dim]`
    pub fn forward(&self, dense: &Array2<f64>, codes: &Array2<usize>) -> Result<Array2<f64>> {
        let embedded = match &self.embedding {
            Some(e) => Some(e.forward(codes)?),
            None => None,
        };
        let mut input = self.build_input(dense, embedded)?;
        let mut outputs = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let out = layer.forward(&input)?;
            input = concatenate(Axis(1), &[input.view(), out.view()])?;
            outputs.push(out);
        }
        Ok(self.head(&outputs))
    }

    /// Training forward pass with dropout, keeping intermediates
    pub fn forward_train<R: Rng + ?Sized>(
        &self,
        dense: &Array2<f64>,
        codes: &Array2<usize>,
        rng: &mut R,
    ) -> Result<(Array2<f64>, NodeCache)> {
        let (embedded, embedding_mask) = match &self.embedding {
            Some(e) => {
                let (out, mask) = e.forward_train(codes, rng)?;
                (Some(out), mask)
            }
            None => (None, None),
        };
        let mut input = self.build_input(dense, embedded)?;
        let dropout = self.architecture.input_dropout;

        let mut outputs = Vec::with_capacity(self.layers.len());
        let mut input_masks = Vec::with_capacity(self.layers.len());
        let mut layer_caches = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (out, cache) = if dropout > 0.0 {
                let mask = dropout_mask(input.dim(), dropout, rng);
                let dropped = &input * &mask;
                input_masks.push(Some(mask));
                layer.forward_with_cache(&dropped)?
            } else {
                input_masks.push(None);
                layer.forward_with_cache(&input)?
            };
            input = concatenate(Axis(1), &[input.view(), out.view()])?;
            outputs.push(out);
            layer_caches.push(cache);
        }

        let cache = NodeCache {
            codes: codes.clone(),
            embedding_mask,
            input_masks,
            layer_caches,
        };
        Ok((self.head(&outputs), cache))
    }

    /// Mean over every tree of every layer of the first `output_dim` channels
    fn head(&self, outputs: &[Array2<f64>]) -> Array2<f64> {
        let batch = outputs.first().map(|o| o.nrows()).unwrap_or(0);
        let k = self.architecture.tree_dim;
        let n_out = self.architecture.output_dim;
        let mut head = Array2::<f64>::zeros((batch, n_out));
        let mut count = 0usize;
        for out in outputs {
            for t in 0..self.architecture.num_trees {
                head += &out.slice(s![.., t * k..t * k + n_out]);
                count += 1;
            }
        }
        if count > 0 {
            head /= count as f64;
        }
        head
    }

    /// Gradients of every parameter, in [`Parameterized::parameters_mut`] order
    pub fn backward(&self, grad_head: &Array2<f64>, cache: &NodeCache) -> Result<Vec<ArrayD<f64>>> {
        let batch = grad_head.nrows();
        let n_out = self.architecture.output_dim;
        if grad_head.ncols() != n_out {
            return Err(TabularError::ShapeError {
                expected: format!("{} output columns", n_out),
                actual: grad_head.ncols().to_string(),
            });
        }
        let k = self.architecture.tree_dim;
        let num_trees = self.architecture.num_trees;
        let layer_out = num_trees * k;
        let input_dim = self.architecture.input_dim();
        let scale = 1.0 / (self.layers.len() * num_trees) as f64;

        let mut grad_outputs: Vec<Array2<f64>> = self
            .layers
            .iter()
            .map(|_| {
                let mut g = Array2::<f64>::zeros((batch, layer_out));
                for t in 0..num_trees {
                    g.slice_mut(s![.., t * k..t * k + n_out])
                        .assign(&(grad_head * scale));
                }
                g
            })
            .collect();

        let mut grad_x0 = Array2::<f64>::zeros((batch, input_dim));
        let mut layer_grads: Vec<Vec<ArrayD<f64>>> = vec![Vec::new(); self.layers.len()];
        for l in (0..self.layers.len()).rev() {
            let grads = self.layers[l].backward(&grad_outputs[l], &cache.layer_caches[l])?;
            let (params, mut grad_input) = grads.into_parameter_grads();
            if let Some(mask) = &cache.input_masks[l] {
                grad_input *= mask;
            }
            grad_x0 += &grad_input.slice(s![.., 0..input_dim]);
            for (prev, grad_prev) in grad_outputs.iter_mut().enumerate().take(l) {
                let offset = input_dim + prev * layer_out;
                *grad_prev += &grad_input.slice(s![.., offset..offset + layer_out]);
            }
            layer_grads[l] = params;
        }

        let mut all = Vec::new();
        if let Some(embedding) = &self.embedding {
            let grad_embedded = grad_x0.slice(s![.., self.architecture.n_dense..]).to_owned();
            all.extend(embedding.backward(
                &cache.codes,
                &grad_embedded,
                cache.embedding_mask.as_ref(),
            ));
        }
        all.extend(layer_grads.into_iter().flatten());
        Ok(all)
    }
}

impl Parameterized for NodeModel {
    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        let mut params = Vec::new();
        if let Some(embedding) = self.embedding.as_mut() {
            params.extend(embedding.parameters_mut());
        }
        for layer in self.layers.iter_mut() {
            params.extend(layer.parameters_mut());
        }
        params
    }

    fn num_parameters(&self) -> usize {
        self.embedding.as_ref().map(|e| e.num_parameters()).unwrap_or(0)
            + self.layers.iter().map(|l| l.num_parameters()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BinFunction, ChoiceFunction};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn architecture(num_layers: usize, embedding: bool) -> NodeArchitecture {
        NodeArchitecture {
            n_dense: 3,
            embedding_shapes: if embedding { vec![(4, 2)] } else { Vec::new() },
            output_dim: 2,
            tree_dim: 3,
            depth: 2,
            num_trees: 3,
            num_layers,
            choice_function: ChoiceFunction::Entmax15,
            bin_function: BinFunction::Entmoid15,
            input_dropout: 0.0,
            embedding_dropout: 0.0,
            threshold_init_beta: 1.0,
            threshold_init_cutoff: 1.0,
        }
    }

    fn batch() -> (Array2<f64>, Array2<usize>) {
        let dense = Array2::from_shape_fn((12, 3), |(i, j)| ((i * 7 + j * 3) as f64 * 0.29).sin());
        let codes = Array2::from_shape_fn((12, 1), |(i, _)| i % 4);
        (dense, codes)
    }

    #[test]
    fn test_forward_shapes() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let mut model = NodeModel::new(architecture(2, true), &mut rng);
        let (dense, codes) = batch();
        model.initialize(&dense, &codes, &mut rng).unwrap();

        let out = model.forward(&dense, &codes).unwrap();
        assert_eq!(out.dim(), (12, 2));
        let (train_out, _) = model.forward_train(&dense, &codes, &mut rng).unwrap();
        assert!((&out - &train_out).iter().all(|d| d.abs() < 1e-12));
    }

    #[test]
    fn test_gradient_count_matches_parameters() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let mut model = NodeModel::new(architecture(2, true), &mut rng);
        let (dense, codes) = batch();
        model.initialize(&dense, &codes, &mut rng).unwrap();

        let (out, cache) = model.forward_train(&dense, &codes, &mut rng).unwrap();
        let grads = model.backward(&Array2::ones(out.raw_dim()), &cache).unwrap();
        let params = model.parameters_mut();
        assert_eq!(grads.len(), params.len());
        for (g, p) in grads.iter().zip(params.iter()) {
            assert_eq!(g.shape(), p.shape());
        }
    }

    #[test]
    fn test_dense_block_gradient_matches_finite_differences() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let mut model = NodeModel::new(architecture(2, true), &mut rng);
        let (dense, codes) = batch();
        model.initialize(&dense, &codes, &mut rng).unwrap();
        let weights = Array2::from_shape_fn((12, 2), |(i, j)| ((i + j) as f64 * 0.3).cos());

        let (_, cache) = model.forward_train(&dense, &codes, &mut rng).unwrap();
        let grads = model.backward(&weights, &cache).unwrap();

        // embedding table, row 1, column 0
        let analytic = grads[0][[1, 0]];
        let eps = 1e-6;
        let loss = |m: &NodeModel| (m.forward(&dense, &codes).unwrap() * &weights).sum();
        let mut plus = model.clone();
        plus.parameters_mut()[0][[1, 0]] += eps;
        let mut minus = model.clone();
        minus.parameters_mut()[0][[1, 0]] -= eps;
        let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
        assert!((numeric - analytic).abs() < 1e-4, "{} vs {}", numeric, analytic);
    }

    #[test]
    fn test_rejects_wrong_dense_width() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let model = NodeModel::new(architecture(1, false), &mut rng);
        let err = model
            .forward(&Array2::zeros((2, 5)), &Array2::zeros((2, 0)))
            .unwrap_err();
        assert!(matches!(err, TabularError::ShapeError { .. }));
    }
}
