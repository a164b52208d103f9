//! Feature scaling with mean imputation

use crate::error::{Result, TabularError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Type of scaler to use
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScalerType {
    /// Standard scaling (z-score normalization): (x - mean) / std
    Standard,
    /// Only impute nulls, leave values untouched
    None,
}

/// Parameters for a fitted column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ScalerParams {
    column: String,
    mean: f64,
    std: f64,
}

/// Column-wise scaler. Nulls are replaced by the fitted mean before scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    scaler_type: ScalerType,
    params: Vec<ScalerParams>,
    is_fitted: bool,
}

impl Scaler {
    /// Create a new scaler
    pub fn new(scaler_type: ScalerType) -> Self {
        Self {
            scaler_type,
            params: Vec::new(),
            is_fitted: false,
        }
    }

    /// Fit the scaler to the data
    pub fn fit(&mut self, df: &DataFrame, columns: &[String]) -> Result<&mut Self> {
        self.params.clear();
        for col_name in columns {
            let column = df
                .column(col_name)
                .map_err(|_| TabularError::FeatureNotFound(col_name.clone()))?;
            let series = column.as_materialized_series().cast(&DataType::Float64)?;
            let ca = series.f64()?;

            let mean = ca.mean().unwrap_or(0.0);
            let std = match ca.std(1) {
                Some(s) if s > 0.0 && s.is_finite() => s,
                _ => 1.0,
            };
            self.params.push(ScalerParams {
                column: col_name.clone(),
                mean,
                std,
            });
        }

        self.is_fitted = true;
        Ok(self)
    }

    /// Transform the data.
    /// Builds all replacement columns first, then applies them in a single pass.
    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(TabularError::ModelNotFitted);
        }

        let replacements: Vec<Series> = self
            .params
            .iter()
            .map(|params| {
                let column = df
                    .column(&params.column)
                    .map_err(|_| TabularError::FeatureNotFound(params.column.clone()))?;
                self.scale_series(column.as_materialized_series(), params)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut result = df.clone();
        for scaled in replacements {
            result.with_column(scaled)?;
        }

        Ok(result)
    }

    /// Fit and transform in one step
    pub fn fit_transform(&mut self, df: &DataFrame, columns: &[String]) -> Result<DataFrame> {
        self.fit(df, columns)?;
        self.transform(df)
    }

    /// Fitted (mean, std) of a column
    pub fn stats(&self, column: &str) -> Option<(f64, f64)> {
        self.params
            .iter()
            .find(|p| p.column == column)
            .map(|p| (p.mean, p.std))
    }

    fn scale_series(&self, series: &Series, params: &ScalerParams) -> Result<Series> {
        let series = series.cast(&DataType::Float64)?;
        let ca = series.f64()?;

        let scaled: Float64Chunked = ca
            .into_iter()
            .map(|opt| {
                let v = match opt {
                    Some(v) if v.is_finite() => v,
                    _ => params.mean,
                };
                Some(match self.scaler_type {
                    ScalerType::Standard => (v - params.mean) / params.std,
                    ScalerType::None => v,
                })
            })
            .collect();

        Ok(scaled.with_name(series.name().clone()).into_series())
    }
}
