//! Continuous feature transformations
//!
//! Quantile mapping (to a uniform or normal output distribution) and
//! Box-Cox / Yeo-Johnson power transforms with a likelihood grid search
//! for lambda.

use crate::error::{Result, TabularError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Maximum number of reference quantiles stored per column
const MAX_QUANTILES: usize = 1000;

/// Clipping bound for the normal output distribution
const NORMAL_CLIP: f64 = 1e-7;

/// Transformation applied to continuous features before scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContinuousFeatureTransform {
    /// Map through the empirical CDF, then the standard normal quantile function
    QuantileNormal,
    /// Map through the empirical CDF onto [0, 1]
    QuantileUniform,
    /// Box-Cox power transform (data shifted to be positive)
    BoxCox,
    /// Yeo-Johnson power transform
    YeoJohnson,
}

/// Fitted state for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ColumnParams {
    Quantiles(Vec<f64>),
    Power { lambda: f64, shift: f64 },
}

/// Feature transformer for continuous columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousTransformer {
    transform_type: ContinuousFeatureTransform,
    params: Vec<(String, ColumnParams)>,
    is_fitted: bool,
}

impl ContinuousTransformer {
    /// Create a new transformer
    pub fn new(transform_type: ContinuousFeatureTransform) -> Self {
        Self {
            transform_type,
            params: Vec::new(),
            is_fitted: false,
        }
    }

    /// Fit the transformer to the data
    pub fn fit(&mut self, df: &DataFrame, columns: &[String]) -> Result<&mut Self> {
        self.params.clear();
        for col_name in columns {
            let column = df
                .column(col_name)
                .map_err(|_| TabularError::FeatureNotFound(col_name.clone()))?;
            let series = column.as_materialized_series().cast(&DataType::Float64)?;

            let values: Vec<f64> = series
                .f64()?
                .into_iter()
                .flatten()
                .filter(|v| v.is_finite())
                .collect();

            if values.is_empty() {
                return Err(TabularError::DataError(format!(
                    "column '{}' has no finite values to fit a transform on",
                    col_name
                )));
            }

            let params = self.compute_params(values);
            self.params.push((col_name.clone(), params));
        }

        self.is_fitted = true;
        Ok(self)
    }

    fn compute_params(&self, mut values: Vec<f64>) -> ColumnParams {
        match self.transform_type {
            ContinuousFeatureTransform::QuantileNormal
            | ContinuousFeatureTransform::QuantileUniform => {
                values.sort_by(|a, b| a.total_cmp(b));
                let n_quantiles = values.len().min(MAX_QUANTILES);
                let quantiles = (0..n_quantiles)
                    .map(|i| {
                        let level = if n_quantiles == 1 {
                            0.0
                        } else {
                            i as f64 / (n_quantiles - 1) as f64
                        };
                        sorted_quantile(&values, level)
                    })
                    .collect();
                ColumnParams::Quantiles(quantiles)
            }
            ContinuousFeatureTransform::BoxCox => {
                let min_val = values.iter().cloned().fold(f64::INFINITY, f64::min);
                let shift = if min_val <= 0.0 { -min_val + 1.0 } else { 0.0 };
                let shifted: Vec<f64> = values.iter().map(|&v| v + shift).collect();
                let lambda = grid_search_lambda(|l| boxcox_log_likelihood(&shifted, l));
                ColumnParams::Power { lambda, shift }
            }
            ContinuousFeatureTransform::YeoJohnson => {
                let lambda = grid_search_lambda(|l| yeojohnson_log_likelihood(&values, l));
                ColumnParams::Power { lambda, shift: 0.0 }
            }
        }
    }

    /// Transform the data; nulls pass through unchanged
    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(TabularError::ModelNotFitted);
        }

        let mut result = df.clone();
        for (col_name, params) in &self.params {
            let column = df
                .column(col_name)
                .map_err(|_| TabularError::FeatureNotFound(col_name.clone()))?;
            let series = column.as_materialized_series().cast(&DataType::Float64)?;
            let transformed: Float64Chunked = series
                .f64()?
                .into_iter()
                .map(|v| v.map(|x| self.transform_value(x, params)))
                .collect();
            result.with_column(transformed.with_name(series.name().clone()).into_series())?;
        }

        Ok(result)
    }

    /// Fit and transform in one step
    pub fn fit_transform(&mut self, df: &DataFrame, columns: &[String]) -> Result<DataFrame> {
        self.fit(df, columns)?;
        self.transform(df)
    }

    fn transform_value(&self, x: f64, params: &ColumnParams) -> f64 {
        match params {
            ColumnParams::Quantiles(quantiles) => {
                let level = empirical_cdf(quantiles, x);
                match self.transform_type {
                    ContinuousFeatureTransform::QuantileNormal => {
                        normal_ppf(level.clamp(NORMAL_CLIP, 1.0 - NORMAL_CLIP))
                    }
                    _ => level,
                }
            }
            ColumnParams::Power { lambda, shift } => match self.transform_type {
                ContinuousFeatureTransform::BoxCox => boxcox_value((x + shift).max(1e-12), *lambda),
                _ => yeojohnson_value(x, *lambda),
            },
        }
    }
}

/// Linear interpolation into a sorted slice at `level` in [0, 1]
fn sorted_quantile(sorted: &[f64], level: f64) -> f64 {
    let pos = level * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// Position of `x` within the reference quantiles, in [0, 1]
fn empirical_cdf(quantiles: &[f64], x: f64) -> f64 {
    let n = quantiles.len();
    if n < 2 {
        return 0.5;
    }
    let last = (n - 1) as f64;
    let lo = quantiles.partition_point(|&q| q < x);
    let hi = quantiles.partition_point(|&q| q <= x);

    if lo < hi {
        // ties: centre of the run of equal references
        return (lo + hi - 1) as f64 / 2.0 / last;
    }
    if lo == 0 {
        return 0.0;
    }
    if lo == n {
        return 1.0;
    }
    let (q0, q1) = (quantiles[lo - 1], quantiles[lo]);
    let frac = (x - q0) / (q1 - q0);
    ((lo - 1) as f64 + frac) / last
}

/// Standard normal quantile function (Acklam's rational approximation)
fn normal_ppf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838,
        -2.549732539343734,
        4.374664141464968,
        2.938163982698783,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996,
        3.754408661907416,
    ];
    const P_LOW: f64 = 0.02425;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -normal_ppf(1.0 - p)
    }
}

fn grid_search_lambda(log_likelihood: impl Fn(f64) -> f64) -> f64 {
    let mut best_lambda = 1.0;
    let mut best_ll = f64::NEG_INFINITY;
    for lambda_int in -20..=20 {
        let lambda = lambda_int as f64 * 0.1;
        let ll = log_likelihood(lambda);
        if ll > best_ll {
            best_ll = ll;
            best_lambda = lambda;
        }
    }
    best_lambda
}

fn boxcox_value(x: f64, lambda: f64) -> f64 {
    if lambda.abs() < 1e-10 {
        x.ln()
    } else {
        (x.powf(lambda) - 1.0) / lambda
    }
}

fn yeojohnson_value(x: f64, lambda: f64) -> f64 {
    if x >= 0.0 {
        if lambda.abs() < 1e-10 {
            (x + 1.0).ln()
        } else {
            ((x + 1.0).powf(lambda) - 1.0) / lambda
        }
    } else if (lambda - 2.0).abs() < 1e-10 {
        -(-x + 1.0).ln()
    } else {
        -((-x + 1.0).powf(2.0 - lambda) - 1.0) / (2.0 - lambda)
    }
}

fn gaussian_log_likelihood(transformed: &[f64]) -> Option<f64> {
    let n = transformed.len() as f64;
    let mean = transformed.iter().sum::<f64>() / n;
    let variance = transformed.iter().map(|&t| (t - mean).powi(2)).sum::<f64>() / n;
    if variance <= 0.0 || !variance.is_finite() {
        None
    } else {
        Some(-n / 2.0 * variance.ln())
    }
}

fn boxcox_log_likelihood(values: &[f64], lambda: f64) -> f64 {
    let transformed: Vec<f64> = values.iter().map(|&x| boxcox_value(x, lambda)).collect();
    match gaussian_log_likelihood(&transformed) {
        Some(ll) => ll + (lambda - 1.0) * values.iter().map(|&x| x.ln()).sum::<f64>(),
        None => f64::NEG_INFINITY,
    }
}

fn yeojohnson_log_likelihood(values: &[f64], lambda: f64) -> f64 {
    let transformed: Vec<f64> = values.iter().map(|&x| yeojohnson_value(x, lambda)).collect();
    match gaussian_log_likelihood(&transformed) {
        Some(ll) => {
            let log_jacobian: f64 = values
                .iter()
                .map(|&x| (x.abs() + 1.0).ln().copysign(x))
                .sum();
            ll + (lambda - 1.0) * log_jacobian
        }
        None => f64::NEG_INFINITY,
    }
}
