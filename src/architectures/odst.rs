//! Oblivious differentiable decision tree layer (ODST)
//!
//! Every tree has `depth` levels. Each level selects one soft feature
//! (a sparse convex combination of the inputs), compares it against a
//! learned threshold and routes samples left/right with a sparse sigmoid.
//! A tree's output is the routing-weighted sum of its `2^depth` leaf
//! responses, each a `tree_dim`-dimensional vector.
//!
//! Parameter layouts (`j = tree * depth + level`):
//! - `selection_logits`: `[in_features, num_trees * depth]`
//! - `thresholds`, `log_temperatures`: `[num_trees * depth]`
//! - `response`: `[num_trees, tree_dim, 2^depth]`

use super::layers::{BinActivation, SimplexProjection};
use super::Parameterized;
use crate::config::{BinFunction, ChoiceFunction};
use crate::error::{Result, TabularError};
use ndarray::{s, Array1, Array2, Array3, ArrayD, ArrayViewMutD, Axis, Zip};
use rand::Rng;
use rand_distr::{Beta, Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

const TEMPERATURE_EPS: f64 = 1e-6;

/// Intermediate values of a forward pass needed by [`OdstLayer::backward`]
#[derive(Debug, Clone)]
pub struct OdstCache {
    input: Array2<f64>,
    selection: Array2<f64>,
    threshold_logits: Array2<f64>,
    bins: Array2<f64>,
    response_weights: Array3<f64>,
}

/// Gradients of one ODST layer
#[derive(Debug, Clone)]
pub struct OdstGradients {
    pub selection_logits: Array2<f64>,
    pub thresholds: Array1<f64>,
    pub log_temperatures: Array1<f64>,
    pub response: Array3<f64>,
    pub input: Array2<f64>,
}

impl OdstGradients {
    /// Parameter gradients in [`Parameterized::parameters_mut`] order
    pub fn into_parameter_grads(self) -> (Vec<ArrayD<f64>>, Array2<f64>) {
        (
            vec![
                self.selection_logits.into_dyn(),
                self.thresholds.into_dyn(),
                self.log_temperatures.into_dyn(),
                self.response.into_dyn(),
            ],
            self.input,
        )
    }
}

/// One layer of oblivious decision trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdstLayer {
    in_features: usize,
    num_trees: usize,
    depth: usize,
    tree_dim: usize,
    choice_function: ChoiceFunction,
    bin_function: BinFunction,
    selection_logits: Array2<f64>,
    thresholds: Array1<f64>,
    log_temperatures: Array1<f64>,
    response: Array3<f64>,
}

impl OdstLayer {
    /// Create a layer with uniform selection logits and standard normal responses
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        num_trees: usize,
        depth: usize,
        tree_dim: usize,
        choice_function: ChoiceFunction,
        bin_function: BinFunction,
        rng: &mut R,
    ) -> Self {
        let n_splits = num_trees * depth;
        let n_leaves = 1usize << depth;
        let selection_logits = Array2::from_shape_fn((in_features, n_splits), |_| rng.gen::<f64>());
        let response = Array3::from_shape_fn((num_trees, tree_dim, n_leaves), |_| {
            rng.sample::<f64, _>(StandardNormal)
        });

        Self {
            in_features,
            num_trees,
            depth,
            tree_dim,
            choice_function,
            bin_function,
            selection_logits,
            thresholds: Array1::zeros(n_splits),
            log_temperatures: Array1::zeros(n_splits),
            response,
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Output width: `num_trees * tree_dim`
    pub fn output_dim(&self) -> usize {
        self.num_trees * self.tree_dim
    }

    pub fn num_trees(&self) -> usize {
        self.num_trees
    }

    pub fn tree_dim(&self) -> usize {
        self.tree_dim
    }

    /// Data-aware initialisation of thresholds and temperatures.
    ///
    /// Thresholds are placed at Beta(β, β) percentiles of each split's
    /// selected feature values; temperatures at the `cutoff` quantile of the
    /// absolute deviation from the threshold.
    pub fn initialize<R: Rng + ?Sized>(
        &mut self,
        x: &Array2<f64>,
        beta: f64,
        cutoff: f64,
        rng: &mut R,
    ) -> Result<()> {
        self.check_input(x)?;
        if x.nrows() == 0 {
            return Err(TabularError::DataError(
                "cannot initialise trees on an empty batch".to_string(),
            ));
        }
        let beta_dist = Beta::new(beta, beta).map_err(|e| {
            TabularError::invalid_parameter("threshold_init_beta", beta, e.to_string())
        })?;

        let feature_values = x.dot(&self.selection());
        let temperature_q = 100.0 * cutoff.min(1.0);
        let temperature_div = cutoff.max(1.0);

        for (j, column) in feature_values.axis_iter(Axis(1)).enumerate() {
            let mut values = column.to_vec();
            let q = 100.0 * beta_dist.sample(rng);
            let threshold = percentile(&mut values, q);

            let mut deviations: Vec<f64> = column.iter().map(|v| (v - threshold).abs()).collect();
            let temperature = percentile(&mut deviations, temperature_q) / temperature_div;

            self.thresholds[j] = threshold;
            self.log_temperatures[j] = (temperature + TEMPERATURE_EPS).ln();
        }
        Ok(())
    }

    fn check_input(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.in_features {
            return Err(TabularError::ShapeError {
                expected: format!("{} input features", self.in_features),
                actual: x.ncols().to_string(),
            });
        }
        Ok(())
    }

    /// Feature selection weights, one simplex-projected column per split
    fn selection(&self) -> Array2<f64> {
        let mut selection = Array2::zeros(self.selection_logits.raw_dim());
        let choice = self.choice_function;
        Zip::from(selection.axis_iter_mut(Axis(1)))
            .and(self.selection_logits.axis_iter(Axis(1)))
            .par_for_each(|mut out, logits| out.assign(&choice.forward(logits)));
        selection
    }

    /// Forward pass without keeping intermediates
    pub fn forward(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(self.forward_with_cache(x)?.0)
    }

    /// Forward pass returning `[batch, num_trees * tree_dim]` and the cache
    pub fn forward_with_cache(&self, x: &Array2<f64>) -> Result<(Array2<f64>, OdstCache)> {
        self.check_input(x)?;
        let batch = x.nrows();
        let depth = self.depth;
        let n_leaves = 1usize << depth;

        let selection = self.selection();
        let feature_values = x.dot(&selection);
        let inv_temperature = self.log_temperatures.mapv(|v| (-v).exp());
        let threshold_logits = (&feature_values - &self.thresholds) * &inv_temperature;
        let bin = self.bin_function;
        let bins = threshold_logits.mapv(|v| bin.forward(v));

        let mut response_weights = Array3::<f64>::zeros((batch, self.num_trees, n_leaves));
        Zip::from(response_weights.axis_iter_mut(Axis(0)))
            .and(bins.axis_iter(Axis(0)))
            .par_for_each(|mut rw, p| {
                for (t, mut leaves) in rw.axis_iter_mut(Axis(0)).enumerate() {
                    let p_tree = p.slice(s![t * depth..(t + 1) * depth]);
                    for (c, w) in leaves.iter_mut().enumerate() {
                        *w = (0..depth)
                            .map(|d| leaf_match(p_tree[d], c, d))
                            .product();
                    }
                }
            });

        let k = self.tree_dim;
        let mut output = Array2::<f64>::zeros((batch, self.num_trees * k));
        for t in 0..self.num_trees {
            let rw_t = response_weights.index_axis(Axis(1), t);
            let resp_t = self.response.index_axis(Axis(0), t);
            output
                .slice_mut(s![.., t * k..(t + 1) * k])
                .assign(&rw_t.dot(&resp_t.t()));
        }

        let cache = OdstCache {
            input: x.clone(),
            selection,
            threshold_logits,
            bins,
            response_weights,
        };
        Ok((output, cache))
    }

    /// Backward pass for an upstream gradient of shape `[batch, num_trees * tree_dim]`
    pub fn backward(&self, grad_output: &Array2<f64>, cache: &OdstCache) -> Result<OdstGradients> {
        let batch = cache.input.nrows();
        if grad_output.dim() != (batch, self.output_dim()) {
            return Err(TabularError::ShapeError {
                expected: format!("[{}, {}]", batch, self.output_dim()),
                actual: format!("{:?}", grad_output.dim()),
            });
        }
        let depth = self.depth;
        let n_leaves = 1usize << depth;
        let k = self.tree_dim;

        let mut grad_response = Array3::<f64>::zeros(self.response.raw_dim());
        let mut grad_rw = Array3::<f64>::zeros((batch, self.num_trees, n_leaves));
        for t in 0..self.num_trees {
            let g_t = grad_output.slice(s![.., t * k..(t + 1) * k]);
            let rw_t = cache.response_weights.index_axis(Axis(1), t);
            let resp_t = self.response.index_axis(Axis(0), t);
            grad_response
                .index_axis_mut(Axis(0), t)
                .assign(&g_t.t().dot(&rw_t));
            grad_rw.index_axis_mut(Axis(1), t).assign(&g_t.dot(&resp_t));
        }

        // d loss / d bin output, through the product over levels
        let mut grad_bins = Array2::<f64>::zeros(cache.bins.raw_dim());
        Zip::from(grad_bins.axis_iter_mut(Axis(0)))
            .and(cache.bins.axis_iter(Axis(0)))
            .and(grad_rw.axis_iter(Axis(0)))
            .par_for_each(|mut gp, p, grw| {
                let mut prefix = vec![1.0; depth + 1];
                let mut suffix = vec![1.0; depth + 1];
                for t in 0..self.num_trees {
                    let p_tree = p.slice(s![t * depth..(t + 1) * depth]);
                    for c in 0..n_leaves {
                        let g = grw[[t, c]];
                        if g == 0.0 {
                            continue;
                        }
                        for d in 0..depth {
                            prefix[d + 1] = prefix[d] * leaf_match(p_tree[d], c, d);
                        }
                        for d in (0..depth).rev() {
                            suffix[d] = suffix[d + 1] * leaf_match(p_tree[d], c, d);
                        }
                        for d in 0..depth {
                            let sign = if (c >> d) & 1 == 0 { 1.0 } else { -1.0 };
                            gp[t * depth + d] += g * sign * prefix[d] * suffix[d + 1];
                        }
                    }
                }
            });

        let bin = self.bin_function;
        let mut grad_logits = grad_bins;
        Zip::from(&mut grad_logits)
            .and(&cache.bins)
            .for_each(|g, &p| *g *= bin.derivative(p));

        let inv_temperature = self.log_temperatures.mapv(|v| (-v).exp());
        let grad_feature_values = &grad_logits * &inv_temperature;
        let grad_thresholds = -grad_feature_values.sum_axis(Axis(0));
        let grad_log_temperatures = -(&grad_logits * &cache.threshold_logits).sum_axis(Axis(0));

        let grad_selection = cache.input.t().dot(&grad_feature_values);
        let grad_input = grad_feature_values.dot(&cache.selection.t());

        let mut grad_selection_logits = Array2::<f64>::zeros(self.selection_logits.raw_dim());
        let choice = self.choice_function;
        Zip::from(grad_selection_logits.axis_iter_mut(Axis(1)))
            .and(cache.selection.axis_iter(Axis(1)))
            .and(grad_selection.axis_iter(Axis(1)))
            .par_for_each(|mut out, sel, g| out.assign(&choice.backward(sel, g)));

        Ok(OdstGradients {
            selection_logits: grad_selection_logits,
            thresholds: grad_thresholds,
            log_temperatures: grad_log_temperatures,
            response: grad_response,
            input: grad_input,
        })
    }
}

impl Parameterized for OdstLayer {
    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        vec![
            self.selection_logits.view_mut().into_dyn(),
            self.thresholds.view_mut().into_dyn(),
            self.log_temperatures.view_mut().into_dyn(),
            self.response.view_mut().into_dyn(),
        ]
    }

    fn num_parameters(&self) -> usize {
        self.selection_logits.len()
            + self.thresholds.len()
            + self.log_temperatures.len()
            + self.response.len()
    }
}

/// Probability that leaf `c` is reached at level `d`: `p` if the level bit is 0
#[inline]
fn leaf_match(p: f64, c: usize, d: usize) -> f64 {
    if (c >> d) & 1 == 0 {
        p
    } else {
        1.0 - p
    }
}

/// Linearly interpolated percentile, `q` in [0, 100]
fn percentile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let pos = (q / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    values[lo] * (1.0 - frac) + values[hi] * frac
}
