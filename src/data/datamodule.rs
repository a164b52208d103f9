//! Schema validation, splitting and fitted preprocessing for one data configuration

use super::batch::{TabularBatch, Targets};
use crate::config::{DataConfig, DataSummary, TaskKind};
use crate::error::{Result, TabularError};
use crate::preprocessing::{
    ContinuousTransformer, LabelEncoder, LeaveOneOutEncoder, OrdinalEncoder, Scaler, ScalerType,
};
use ndarray::Array2;
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Turns data frames into model-ready [`TabularBatch`]es
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularDatamodule {
    config: DataConfig,
    task: TaskKind,
    embed_categorical: bool,
    transformer: Option<ContinuousTransformer>,
    scaler: Scaler,
    target_encoder: Option<LeaveOneOutEncoder>,
    ordinal: OrdinalEncoder,
    label_encoder: Option<LabelEncoder>,
    dense_columns: Vec<String>,
    is_fitted: bool,
}

impl TabularDatamodule {
    /// Create an unfitted datamodule
    pub fn new(config: DataConfig, task: TaskKind, embed_categorical: bool) -> Self {
        let scaler_type = if config.normalize_continuous_features {
            ScalerType::Standard
        } else {
            ScalerType::None
        };
        let transformer = config
            .continuous_feature_transform
            .map(ContinuousTransformer::new);
        Self {
            config,
            task,
            embed_categorical,
            transformer,
            scaler: Scaler::new(scaler_type),
            target_encoder: None,
            ordinal: OrdinalEncoder::new(),
            label_encoder: None,
            dense_columns: Vec::new(),
            is_fitted: false,
        }
    }

    fn uses_targets(&self) -> bool {
        self.task != TaskKind::Ssl
    }

    /// Check that `df` carries every configured column with a usable type
    pub fn validate_schema(&self, df: &DataFrame, require_targets: bool) -> Result<()> {
        let feature_columns = self
            .config
            .continuous_cols
            .iter()
            .chain(self.config.categorical_cols.iter());
        for name in feature_columns {
            if df.column(name).is_err() {
                return Err(TabularError::DataError(format!(
                    "configured column '{}' is missing from the input data",
                    name
                )));
            }
        }

        for name in &self.config.continuous_cols {
            let dtype = df.column(name)?.dtype().clone();
            if !dtype.is_primitive_numeric() {
                return Err(TabularError::DataError(format!(
                    "continuous column '{}' must be numeric, found {}",
                    name, dtype
                )));
            }
        }

        if require_targets && self.uses_targets() {
            for name in &self.config.target {
                let column = df.column(name).map_err(|_| {
                    TabularError::DataError(format!(
                        "target column '{}' is missing from the input data",
                        name
                    ))
                })?;
                if self.task == TaskKind::Regression && !column.dtype().is_primitive_numeric() {
                    return Err(TabularError::DataError(format!(
                        "regression target '{}' must be numeric, found {}",
                        name,
                        column.dtype()
                    )));
                }
                if column.null_count() > 0 {
                    return Err(TabularError::DataError(format!(
                        "target column '{}' contains {} null values",
                        name,
                        column.null_count()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Seeded train/validation split; stratified by class for classification
    pub fn split(&self, df: &DataFrame, validation_split: f64, seed: u64) -> Result<(DataFrame, DataFrame)> {
        let n = df.height();
        if n < 2 {
            return Err(TabularError::DataError(format!(
                "need at least two rows to split off validation data, got {}",
                n
            )));
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

        let (mut train_idx, mut val_idx) = (Vec::new(), Vec::new());
        if self.task == TaskKind::Classification {
            let target = &self.config.target[0];
            let labels = crate::preprocessing::category_strings(df, target)?;
            let mut groups: BTreeMap<Option<String>, Vec<usize>> = BTreeMap::new();
            for (i, label) in labels.into_iter().enumerate() {
                groups.entry(label).or_default().push(i);
            }
            for indices in groups.values_mut() {
                indices.shuffle(&mut rng);
                let class_val = ((indices.len() as f64 * validation_split).round() as usize)
                    .min(indices.len().saturating_sub(1));
                let split_point = indices.len() - class_val;
                train_idx.extend_from_slice(&indices[..split_point]);
                val_idx.extend_from_slice(&indices[split_point..]);
            }
        } else {
            let mut indices: Vec<usize> = (0..n).collect();
            indices.shuffle(&mut rng);
            let val_size = ((n as f64 * validation_split).round() as usize).clamp(1, n - 1);
            val_idx.extend_from_slice(&indices[..val_size]);
            train_idx.extend_from_slice(&indices[val_size..]);
        }

        if val_idx.is_empty() {
            // every class was a singleton; fall back to one held-out row
            if let Some(row) = train_idx.pop() {
                val_idx.push(row);
            }
        }
        train_idx.sort_unstable();
        val_idx.sort_unstable();

        debug!(train = train_idx.len(), validation = val_idx.len(), "split training data");
        Ok((take_rows(df, &train_idx)?, take_rows(df, &val_idx)?))
    }

    /// Fit every preprocessor on the training frame and encode it
    pub fn fit(&mut self, train: &DataFrame) -> Result<TabularBatch> {
        self.fit_with_vocabulary(train, train)
    }

    /// Like [`Self::fit`], but category and class vocabularies come from
    /// `vocabulary` (the frame before the validation split) so that values
    /// held out for validation still get their own code
    pub fn fit_with_vocabulary(&mut self, vocabulary: &DataFrame, train: &DataFrame) -> Result<TabularBatch> {
        self.validate_schema(vocabulary, true)?;
        self.validate_schema(train, true)?;

        self.label_encoder = match self.task {
            TaskKind::Classification => Some(LabelEncoder::fit(vocabulary, &self.config.target[0])?),
            _ => None,
        };
        self.ordinal.fit(vocabulary, &self.config.categorical_cols)?;
        let targets = self.encode_targets(train, true)?;
        let target_signal = self.target_signal(&targets);

        let mut frame = train.clone();
        if let Some(transformer) = self.transformer.as_mut() {
            frame = transformer.fit_transform(&frame, &self.config.continuous_cols)?;
        }

        self.dense_columns = self.config.continuous_cols.clone();
        if !self.embed_categorical && !self.config.categorical_cols.is_empty() {
            let mut encoder = LeaveOneOutEncoder::new();
            encoder.fit(&frame, &self.config.categorical_cols, target_signal.as_deref())?;
            frame = encoder.transform_train(&frame, target_signal.as_deref())?;
            self.target_encoder = Some(encoder);
            self.dense_columns
                .extend(self.config.categorical_cols.iter().cloned());
        } else {
            self.target_encoder = None;
        }

        let frame = self.scaler.fit_transform(&frame, &self.dense_columns)?;
        self.is_fitted = true;

        Ok(TabularBatch {
            dense: columns_to_array2(&frame, &self.dense_columns)?,
            codes: self.ordinal.transform(train)?,
            targets,
        })
    }

    /// Encode unseen data with the fitted preprocessors
    pub fn transform(&self, df: &DataFrame, with_targets: bool) -> Result<TabularBatch> {
        if !self.is_fitted {
            return Err(TabularError::ModelNotFitted);
        }
        self.validate_schema(df, with_targets)?;

        let mut frame = df.clone();
        if let Some(transformer) = &self.transformer {
            frame = transformer.transform(&frame)?;
        }
        if let Some(encoder) = &self.target_encoder {
            frame = encoder.transform(&frame)?;
        }
        let frame = self.scaler.transform(&frame)?;

        let targets = if with_targets {
            self.encode_targets(df, false)?
        } else {
            Targets::Unlabelled
        };

        Ok(TabularBatch {
            dense: columns_to_array2(&frame, &self.dense_columns)?,
            codes: self.ordinal.transform(df)?,
            targets,
        })
    }

    fn encode_targets(&self, df: &DataFrame, training: bool) -> Result<Targets> {
        match self.task {
            TaskKind::Regression => Ok(Targets::Continuous(columns_to_array2(df, &self.config.target)?)),
            TaskKind::Classification => {
                let encoder = self.label_encoder.as_ref().ok_or(TabularError::ModelNotFitted)?;
                let target = &self.config.target[0];
                let classes = encoder.transform(df, target)?;
                let unseen = classes.iter().filter(|c| c.is_none()).count();
                if unseen > 0 {
                    if training {
                        return Err(TabularError::DataError(format!(
                            "target column '{}' has {} unusable labels",
                            target, unseen
                        )));
                    }
                    warn!(target_column = %target, rows = unseen, "labels not seen during training count as misclassified");
                }
                Ok(Targets::Classes(classes))
            }
            TaskKind::Ssl => Ok(Targets::Unlabelled),
        }
    }

    /// Per-row signal used by the leave-one-out encoder
    fn target_signal(&self, targets: &Targets) -> Option<Vec<f64>> {
        match targets {
            Targets::Continuous(y) => Some(y.rows().into_iter().map(|r| r.mean().unwrap_or(0.0)).collect()),
            Targets::Classes(c) => Some(c.iter().map(|v| v.unwrap_or(0) as f64).collect()),
            Targets::Unlabelled => None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    /// Columns feeding the dense input block, in order
    pub fn dense_columns(&self) -> &[String] {
        &self.dense_columns
    }

    /// Sorted class labels (classification only)
    pub fn classes(&self) -> Option<&[String]> {
        self.label_encoder.as_ref().map(|e| e.classes())
    }

    /// Fitted ordinal encoder for categorical columns
    pub fn ordinal_encoder(&self) -> &OrdinalEncoder {
        &self.ordinal
    }

    /// Names of the self-supervised reconstruction channels
    pub fn reconstruction_names(&self) -> Vec<String> {
        let mut names = self.dense_columns.clone();
        if self.embed_categorical {
            names.extend(self.config.categorical_cols.iter().cloned());
        }
        names
    }

    /// Data-dependent sizes of the fitted data
    pub fn summary(&self) -> DataSummary {
        DataSummary {
            n_dense: self.dense_columns.len(),
            categorical_cardinalities: self.ordinal.cardinalities(),
            n_classes: self.label_encoder.as_ref().map(|e| e.n_classes()),
            reconstruction_dim: self.reconstruction_names().len(),
        }
    }
}

fn take_rows(df: &DataFrame, indices: &[usize]) -> Result<DataFrame> {
    let idx: Vec<IdxSize> = indices.iter().map(|&i| i as IdxSize).collect();
    Ok(df.take(&IdxCa::from_vec("idx".into(), idx))?)
}

/// Collect numeric columns into a row-major `[rows, columns]` array
pub(crate) fn columns_to_array2(df: &DataFrame, col_names: &[String]) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let n_cols = col_names.len();

    let col_data: Vec<Vec<f64>> = col_names
        .iter()
        .map(|col_name| {
            let column = df
                .column(col_name)
                .map_err(|_| TabularError::FeatureNotFound(col_name.clone()))?;
            let series = column.as_materialized_series().cast(&DataType::Float64)?;
            let values: Vec<f64> = series
                .f64()?
                .into_iter()
                .map(|v| v.unwrap_or(0.0))
                .collect();
            Ok(values)
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
    Ok(Array2::from_shape_fn((n_rows, n_cols), |(r, c)| col_refs[c][r]))
}
