//! Training orchestrator
//!
//! [`TabularModel`] ties the configuration objects, the datamodule, the
//! NODE model and the task variant together behind `fit`, `evaluate`,
//! `predict`, `save_model` and `load_model`.

use crate::architectures::NodeModel;
use crate::config::{
    DataConfig, ExperimentConfig, ModelConfigResolver, NodeArchitecture, NodeConfig,
    OptimizerConfig, ResolvedModelSpec, SslTask, TaskKind, TrainerConfig,
};
use crate::data::TabularDatamodule;
use crate::error::{Result, TabularError};
use crate::tasks::{build_task, classification::argmax_rows, TaskBehavior};
use crate::training::{EvaluationRecord, Trainer, TrainingHistory};
use ndarray::Array2;
use polars::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

const SAVE_FORMAT_VERSION: u32 = 1;

/// Everything produced by a successful `fit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedState {
    spec: ResolvedModelSpec,
    architecture: NodeArchitecture,
    datamodule: TabularDatamodule,
    model: NodeModel,
    history: TrainingHistory,
}

#[derive(Serialize, Deserialize)]
struct SavedModel {
    format_version: u32,
    config: ExperimentConfig,
    state: FittedState,
    test_results: Option<Vec<EvaluationRecord>>,
}

/// Configuration-driven NODE model for tabular data
#[derive(Debug, Clone)]
pub struct TabularModel {
    config: ExperimentConfig,
    fitted: Option<FittedState>,
    test_results: Option<Vec<EvaluationRecord>>,
}

impl TabularModel {
    /// Store the configuration; nothing is validated until `fit`
    pub fn new(
        data_config: DataConfig,
        model_config: NodeConfig,
        optimizer_config: OptimizerConfig,
        trainer_config: TrainerConfig,
    ) -> Self {
        Self::from_config(ExperimentConfig::new(
            data_config,
            model_config,
            optimizer_config,
            trainer_config,
        ))
    }

    pub fn from_config(config: ExperimentConfig) -> Self {
        Self {
            config,
            fitted: None,
            test_results: None,
        }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Per-epoch losses of the last `fit`
    pub fn training_history(&self) -> Option<&TrainingHistory> {
        self.fitted.as_ref().map(|s| &s.history)
    }

    /// Records from evaluating the test frame passed to `fit`
    pub fn test_results(&self) -> Option<&[EvaluationRecord]> {
        self.test_results.as_deref()
    }

    pub fn resolved_spec(&self) -> Option<&ResolvedModelSpec> {
        self.fitted.as_ref().map(|s| &s.spec)
    }

    /// Trained network
    pub fn network(&self) -> Option<&NodeModel> {
        self.fitted.as_ref().map(|s| &s.model)
    }

    /// Fitted preprocessing
    pub fn datamodule(&self) -> Option<&TabularDatamodule> {
        self.fitted.as_ref().map(|s| &s.datamodule)
    }

    fn state(&self) -> Result<&FittedState> {
        self.fitted.as_ref().ok_or_else(|| {
            TabularError::StateError("model has not been fitted; call fit first".to_string())
        })
    }

    fn task(state: &FittedState) -> Result<Box<dyn TaskBehavior>> {
        build_task(&state.spec, &state.architecture)
    }

    /// Train on `train`; when `test` is given it is evaluated afterwards
    pub fn fit(&mut self, train: &DataFrame, test: Option<&DataFrame>) -> Result<&mut Self> {
        let start = Instant::now();
        let spec = ModelConfigResolver::resolve(&self.config.data, &self.config.model)?;
        self.config.optimizer.validate()?;
        self.config.trainer.validate()?;
        let trainer_config = self.config.trainer.clone();

        if let Some(gpus) = trainer_config.gpus.filter(|&g| g > 0) {
            warn!(gpus, "GPU execution is not available; training on CPU");
        }

        let mut datamodule =
            TabularDatamodule::new(self.config.data.clone(), spec.task, spec.embed_categorical);
        datamodule.validate_schema(train, true)?;

        info!(
            task = %spec.task,
            rows = train.height(),
            features = self.config.data.n_features(),
            "fitting tabular model"
        );

        let (train_split, valid_split) =
            datamodule.split(train, trainer_config.validation_split, trainer_config.seed)?;
        let train_batch = datamodule.fit_with_vocabulary(train, &train_split)?;
        let valid_batch = datamodule.transform(&valid_split, true)?;

        let architecture = spec.architecture(&datamodule.summary())?;
        let task = build_task(&spec, &architecture)?;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(trainer_config.seed);
        let mut model = NodeModel::new(architecture.clone(), &mut rng);

        let mut trainer = Trainer::new(trainer_config, self.config.optimizer.clone());
        let history = trainer.fit(&mut model, task.as_ref(), &train_batch, &valid_batch)?;

        self.fitted = Some(FittedState {
            spec,
            architecture,
            datamodule,
            model,
            history,
        });
        self.test_results = None;

        if let Some(test) = test {
            let records = self.evaluate(test)?;
            for record in &records {
                info!(target_column = ?record.target, metrics = ?record.metrics, "test results");
            }
            self.test_results = Some(records);
        }

        info!(elapsed_ms = start.elapsed().as_millis() as u64, "fit complete");
        Ok(self)
    }

    /// Score a labelled frame
    pub fn evaluate(&self, test: &DataFrame) -> Result<Vec<EvaluationRecord>> {
        let state = self.state()?;
        if test.height() == 0 {
            return Err(TabularError::DataError(
                "cannot evaluate on an empty frame".to_string(),
            ));
        }
        let batch = state.datamodule.transform(test, true)?;
        Self::task(state)?.evaluate(&state.model, &batch, self.config.trainer.seed)
    }

    /// Append prediction columns to `data`
    pub fn predict(&self, data: &DataFrame) -> Result<DataFrame> {
        let state = self.state()?;
        let batch = state.datamodule.transform(data, false)?;
        let predictions = Self::task(state)?.predict(&state.model, &batch)?;

        let mut output = data.clone();
        for column in self.prediction_columns(state, &predictions)? {
            output.with_column(column)?;
        }
        Ok(output)
    }

    fn prediction_columns(&self, state: &FittedState, predictions: &Array2<f64>) -> Result<Vec<Column>> {
        let named = |names: Vec<String>| -> Vec<Column> {
            names
                .into_iter()
                .zip(predictions.columns())
                .map(|(name, values)| Column::new(name.into(), values.to_vec()))
                .collect()
        };

        match state.spec.task {
            TaskKind::Regression => Ok(named(
                state.spec.targets.iter().map(|t| format!("{}_prediction", t)).collect(),
            )),
            TaskKind::Classification => {
                let classes = state
                    .datamodule
                    .classes()
                    .ok_or_else(|| TabularError::StateError("class labels are missing".to_string()))?;
                let mut columns = named(classes.iter().map(|c| format!("{}_probability", c)).collect());
                let labels: Vec<String> = argmax_rows(predictions)
                    .into_iter()
                    .map(|i| classes[i].clone())
                    .collect();
                columns.push(Column::new("prediction".into(), labels));
                Ok(columns)
            }
            TaskKind::Ssl => {
                let names = match state.spec.ssl.map(|s| s.ssl_task) {
                    Some(SslTask::Contrastive) => (0..predictions.ncols())
                        .map(|i| format!("latent_dim_{}", i))
                        .collect(),
                    _ => state
                        .datamodule
                        .reconstruction_names()
                        .into_iter()
                        .map(|n| format!("{}_reconstruction", n))
                        .collect(),
                };
                Ok(named(names))
            }
        }
    }

    /// Write configuration and fitted state as JSON
    pub fn save_model(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = self.state()?.clone();
        let saved = SavedModel {
            format_version: SAVE_FORMAT_VERSION,
            config: self.config.clone(),
            state,
            test_results: self.test_results.clone(),
        };
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer(std::io::BufWriter::new(file), &saved)?;
        info!(path = %path.as_ref().display(), "model saved");
        Ok(())
    }

    /// Restore a model written by [`TabularModel::save_model`]
    pub fn load_model(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let saved: SavedModel = serde_json::from_reader(std::io::BufReader::new(file))?;
        if saved.format_version != SAVE_FORMAT_VERSION {
            return Err(TabularError::SerializationError(format!(
                "unsupported model format version {}",
                saved.format_version
            )));
        }
        Ok(Self {
            config: saved.config,
            fitted: Some(saved.state),
            test_results: saved.test_results,
        })
    }
}
