//! Gradient-based parameter updates and learning-rate schedules

use crate::config::{LrScheduler, OptimizerConfig, OptimizerKind};
use crate::error::{Result, TabularError};
use ndarray::{ArrayD, ArrayViewMutD, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

/// Stateful optimizer applying one update per mini-batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Optimizer {
    config: OptimizerConfig,
    learning_rate: f64,
    step: u64,
    first_moment: Vec<ArrayD<f64>>,
    second_moment: Vec<ArrayD<f64>>,
    // ReduceOnPlateau bookkeeping
    best_metric: f64,
    bad_epochs: usize,
}

impl Optimizer {
    /// Create an optimizer with empty state
    pub fn new(config: OptimizerConfig) -> Self {
        let learning_rate = config.learning_rate;
        Self {
            config,
            learning_rate,
            step: 0,
            first_moment: Vec::new(),
            second_moment: Vec::new(),
            best_metric: f64::INFINITY,
            bad_epochs: 0,
        }
    }

    /// Current learning rate
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Apply one update
    pub fn step(&mut self, params: Vec<ArrayViewMutD<'_, f64>>, grads: &[ArrayD<f64>]) -> Result<()> {
        if params.len() != grads.len() {
            return Err(TabularError::ShapeError {
                expected: format!("{} gradients", params.len()),
                actual: grads.len().to_string(),
            });
        }
        if self.first_moment.is_empty() {
            self.first_moment = grads.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
            self.second_moment = grads.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
        }
        self.step += 1;

        let lr = self.learning_rate;
        let wd = self.config.weight_decay;
        let t = self.step as i32;
        let bias1 = 1.0 - BETA1.powi(t);
        let bias2 = 1.0 - BETA2.powi(t);

        for (i, (mut param, grad)) in params.into_iter().zip(grads).enumerate() {
            if param.shape() != grad.shape() {
                return Err(TabularError::ShapeError {
                    expected: format!("{:?}", param.shape()),
                    actual: format!("{:?}", grad.shape()),
                });
            }
            let m = &mut self.first_moment[i];
            let v = &mut self.second_moment[i];

            match self.config.optimizer {
                OptimizerKind::Adam | OptimizerKind::AdamW => {
                    let decoupled = matches!(self.config.optimizer, OptimizerKind::AdamW);
                    Zip::from(&mut param)
                        .and(grad)
                        .and(m)
                        .and(v)
                        .for_each(|p, &g, m, v| {
                            let g = if decoupled { g } else { g + wd * *p };
                            *m = BETA1 * *m + (1.0 - BETA1) * g;
                            *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                            let m_hat = *m / bias1;
                            let v_hat = *v / bias2;
                            if decoupled {
                                *p -= lr * wd * *p;
                            }
                            *p -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
                        });
                }
                OptimizerKind::Sgd { momentum } => {
                    Zip::from(&mut param).and(grad).and(m).for_each(|p, &g, velocity| {
                        let g = g + wd * *p;
                        *velocity = momentum * *velocity + g;
                        *p -= lr * *velocity;
                    });
                }
            }
        }
        Ok(())
    }

    /// Advance the learning-rate schedule after an epoch
    pub fn end_epoch(&mut self, epoch: usize, monitored: f64) {
        let before = self.learning_rate;
        match self.config.lr_scheduler {
            Some(LrScheduler::StepLr { step_size, gamma }) => {
                if (epoch + 1) % step_size == 0 {
                    self.learning_rate *= gamma;
                }
            }
            Some(LrScheduler::ExponentialLr { gamma }) => self.learning_rate *= gamma,
            Some(LrScheduler::ReduceOnPlateau { factor, patience }) => {
                if monitored < self.best_metric {
                    self.best_metric = monitored;
                    self.bad_epochs = 0;
                } else {
                    self.bad_epochs += 1;
                    if self.bad_epochs > patience {
                        self.learning_rate *= factor;
                        self.bad_epochs = 0;
                    }
                }
            }
            None => {}
        }
        if self.learning_rate != before {
            debug!(epoch, from = before, to = self.learning_rate, "learning rate adjusted");
        }
    }
}

/// Rescale gradients so their global L2 norm is at most `max_norm`; returns the original norm
pub fn clip_grad_norm(grads: &mut [ArrayD<f64>], max_norm: f64) -> f64 {
    let norm = grads
        .iter()
        .map(|g| g.iter().map(|v| v * v).sum::<f64>())
        .sum::<f64>()
        .sqrt();
    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        for g in grads.iter_mut() {
            g.mapv_inplace(|v| v * scale);
        }
    }
    norm
}
