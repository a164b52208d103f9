//! Optimizer configuration

use crate::error::{Result, TabularError};
use serde::{Deserialize, Serialize};

/// Gradient-based update rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OptimizerKind {
    /// Adam with L2 penalty folded into the gradient
    Adam,
    /// Adam with decoupled weight decay
    AdamW,
    /// Stochastic gradient descent with momentum
    Sgd { momentum: f64 },
}

/// Learning-rate schedule, stepped once per epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LrScheduler {
    /// Multiply by `gamma` every `step_size` epochs
    StepLr { step_size: usize, gamma: f64 },
    /// Multiply by `gamma` every epoch
    ExponentialLr { gamma: f64 },
    /// Multiply by `factor` after `patience` epochs without validation improvement
    ReduceOnPlateau { factor: f64, patience: usize },
}

/// Configuration for the optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub lr_scheduler: Option<LrScheduler>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Adam,
            learning_rate: 1e-3,
            weight_decay: 0.0,
            lr_scheduler: None,
        }
    }
}

impl OptimizerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the optimizer
    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Builder method to set learning rate
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Builder method to set weight decay
    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Builder method to set the scheduler
    pub fn with_lr_scheduler(mut self, scheduler: LrScheduler) -> Self {
        self.lr_scheduler = Some(scheduler);
        self
    }

    /// Check hyperparameter ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(TabularError::invalid_parameter(
                "learning_rate",
                self.learning_rate,
                "must be a positive finite number",
            ));
        }
        if !(self.weight_decay >= 0.0) {
            return Err(TabularError::invalid_parameter(
                "weight_decay",
                self.weight_decay,
                "must be non-negative",
            ));
        }
        if let OptimizerKind::Sgd { momentum } = self.optimizer {
            if !(0.0..1.0).contains(&momentum) {
                return Err(TabularError::invalid_parameter(
                    "momentum",
                    momentum,
                    "must lie in [0, 1)",
                ));
            }
        }
        match self.lr_scheduler {
            Some(LrScheduler::StepLr { step_size, gamma }) => {
                if step_size == 0 {
                    return Err(TabularError::invalid_parameter("step_size", 0, "must be positive"));
                }
                check_factor("gamma", gamma)?;
            }
            Some(LrScheduler::ExponentialLr { gamma }) => check_factor("gamma", gamma)?,
            Some(LrScheduler::ReduceOnPlateau { factor, .. }) => check_factor("factor", factor)?,
            None => {}
        }
        Ok(())
    }
}

fn check_factor(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(TabularError::invalid_parameter(name, value, "must lie in (0, 1]"))
    }
}
