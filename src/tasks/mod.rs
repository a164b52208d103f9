//! Task variants
//!
//! Every learning objective implements [`TaskBehavior`]: which loss it
//! optimises, which `test_*` metrics it reports, how raw model outputs turn
//! into predictions, and how one batch is stepped through the model.
//! [`build_task`] picks the variant for a resolved model spec.

pub mod augmentation;
pub mod classification;
pub mod loss;
pub mod regression;
pub mod ssl;

pub use classification::ClassificationTask;
pub use loss::Loss;
pub use regression::RegressionTask;
pub use ssl::SelfSupervisedTask;

use crate::architectures::NodeModel;
use crate::config::{NodeArchitecture, ResolvedModelSpec, TaskKind};
use crate::data::TabularBatch;
use crate::error::{Result, TabularError};
use crate::training::EvaluationRecord;
use ndarray::{Array2, ArrayD};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::fmt::Debug;

/// Whether a step should produce gradients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Dropout active, gradients returned
    Train,
    /// Inference forward pass, loss only
    Eval,
}

/// Result of stepping one batch
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub loss: f64,
    /// Parameter gradients in `Parameterized::parameters_mut` order (train mode only)
    pub grads: Option<Vec<ArrayD<f64>>>,
}

/// Behaviour that differs between learning objectives
pub trait TaskBehavior: Send + Sync + Debug {
    fn kind(&self) -> TaskKind;

    /// Objective optimised by [`TaskBehavior::step`]
    fn build_loss(&self) -> Loss;

    /// `test_<metric>` keys reported by [`TaskBehavior::evaluate`]
    fn metric_keys(&self) -> Vec<String>;

    /// Turn raw model outputs into predictions
    fn postprocess_targets(&self, raw: &Array2<f64>) -> Array2<f64>;

    /// Forward, loss and (in train mode) backward for one batch
    fn step(
        &self,
        model: &NodeModel,
        batch: &TabularBatch,
        mode: StepMode,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<StepOutput>;

    /// Score a labelled data set; any randomness is seeded from `seed`
    fn evaluate(&self, model: &NodeModel, data: &TabularBatch, seed: u64) -> Result<Vec<EvaluationRecord>>;

    /// Postprocessed predictions for every row
    fn predict(&self, model: &NodeModel, data: &TabularBatch) -> Result<Array2<f64>> {
        let raw = model.forward(&data.dense, &data.codes)?;
        Ok(self.postprocess_targets(&raw))
    }
}

/// Build the task variant for a resolved spec bound to an architecture
pub fn build_task(spec: &ResolvedModelSpec, architecture: &NodeArchitecture) -> Result<Box<dyn TaskBehavior>> {
    match spec.task {
        TaskKind::Regression => Ok(Box::new(RegressionTask::new(spec))),
        TaskKind::Classification => Ok(Box::new(ClassificationTask::new(spec, architecture))),
        TaskKind::Ssl => {
            let settings = spec.ssl.ok_or_else(|| {
                TabularError::ConfigError("ssl task requires ssl_task and aug_task".to_string())
            })?;
            Ok(Box::new(SelfSupervisedTask::new(spec, settings, architecture)))
        }
    }
}

pub(crate) fn missing_targets(task: TaskKind) -> TabularError {
    TabularError::DataError(format!("{} task requires target values", task))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::architectures::NodeModel;
    use crate::config::{BinFunction, ChoiceFunction, NodeArchitecture};
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    pub fn architecture(n_dense: usize, embedding_shapes: Vec<(usize, usize)>, output_dim: usize) -> NodeArchitecture {
        NodeArchitecture {
            n_dense,
            embedding_shapes,
            output_dim,
            tree_dim: output_dim + 1,
            depth: 2,
            num_trees: 4,
            num_layers: 1,
            choice_function: ChoiceFunction::Entmax15,
            bin_function: BinFunction::Entmoid15,
            input_dropout: 0.0,
            embedding_dropout: 0.0,
            threshold_init_beta: 1.0,
            threshold_init_cutoff: 1.0,
        }
    }

    pub fn initialised_model(architecture: NodeArchitecture, dense: &Array2<f64>, codes: &Array2<usize>) -> NodeModel {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let mut model = NodeModel::new(architecture, &mut rng);
        model.initialize(dense, codes, &mut rng).unwrap();
        model
    }

    pub fn dense(rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(i, j)| ((i * 5 + j * 11) as f64 * 0.37).sin())
    }
}
