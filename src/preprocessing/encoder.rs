//! Categorical encoding implementations
//!
//! - [`OrdinalEncoder`]: category -> integer code, code 0 reserved for unknown
//! - [`LeaveOneOutEncoder`]: category -> target mean, excluding the row's own target during training
//! - [`LabelEncoder`]: class label <-> class index for classification targets

use crate::error::{Result, TabularError};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Read any column as optional strings (numbers are formatted)
pub fn category_strings(df: &DataFrame, column: &str) -> Result<Vec<Option<String>>> {
    let col = df
        .column(column)
        .map_err(|_| TabularError::FeatureNotFound(column.to_string()))?;
    let series = col.as_materialized_series().cast(&DataType::String)?;
    let ca = series.str()?;
    Ok(ca.into_iter().map(|v| v.map(|s| s.to_string())).collect())
}

/// Integer code for unseen or null categories
pub const UNKNOWN_CODE: usize = 0;

/// Ordinal encoder with a reserved unknown code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalEncoder {
    // column name -> sorted training categories; code = index + 1
    mappings: Vec<(String, Vec<String>)>,
    is_fitted: bool,
}

impl Default for OrdinalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrdinalEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            mappings: Vec::new(),
            is_fitted: false,
        }
    }

    /// Fit the encoder to the data
    pub fn fit(&mut self, df: &DataFrame, columns: &[String]) -> Result<&mut Self> {
        self.mappings.clear();
        for col_name in columns {
            let categories: BTreeSet<String> =
                category_strings(df, col_name)?.into_iter().flatten().collect();
            self.mappings
                .push((col_name.clone(), categories.into_iter().collect()));
        }
        self.is_fitted = true;
        Ok(self)
    }

    /// Encode every configured column into a `[rows, columns]` code matrix
    pub fn transform(&self, df: &DataFrame) -> Result<Array2<usize>> {
        if !self.is_fitted {
            return Err(TabularError::ModelNotFitted);
        }

        let n_rows = df.height();
        let mut codes = Array2::from_elem((n_rows, self.mappings.len()), UNKNOWN_CODE);
        for (j, (col_name, categories)) in self.mappings.iter().enumerate() {
            let values = category_strings(df, col_name)?;
            for (i, value) in values.iter().enumerate() {
                codes[[i, j]] = value
                    .as_deref()
                    .map(|v| self.code_in(categories, v))
                    .unwrap_or(UNKNOWN_CODE);
            }
        }
        Ok(codes)
    }

    fn code_in(&self, categories: &[String], value: &str) -> usize {
        categories
            .binary_search_by(|c| c.as_str().cmp(value))
            .map(|idx| idx + 1)
            .unwrap_or(UNKNOWN_CODE)
    }

    /// Distinct training categories per column, in column order
    pub fn cardinalities(&self) -> Vec<usize> {
        self.mappings.iter().map(|(_, c)| c.len()).collect()
    }

    /// Training categories of a column; category `i` has code `i + 1`
    pub fn categories(&self, column: &str) -> Option<&[String]> {
        self.mappings
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, c)| c.as_slice())
    }

    /// Encoded column names, in order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.mappings.iter().map(|(name, _)| name.as_str())
    }
}

/// Running target statistics of one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct CategoryStats {
    sum: f64,
    count: usize,
}

/// Leave-one-out target encoder.
///
/// Without a target (self-supervised training) categories are encoded by
/// their relative frequency instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveOneOutEncoder {
    stats: Vec<(String, HashMap<String, CategoryStats>)>,
    global_mean: f64,
    n_rows: usize,
    has_target: bool,
    is_fitted: bool,
}

impl Default for LeaveOneOutEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaveOneOutEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            stats: Vec::new(),
            global_mean: 0.0,
            n_rows: 0,
            has_target: false,
            is_fitted: false,
        }
    }

    /// Fit with an optional per-row target
    pub fn fit(
        &mut self,
        df: &DataFrame,
        columns: &[String],
        target: Option<&[f64]>,
    ) -> Result<&mut Self> {
        if let Some(t) = target {
            if t.len() != df.height() {
                return Err(TabularError::ShapeError {
                    expected: format!("{} target values", df.height()),
                    actual: t.len().to_string(),
                });
            }
        }

        self.stats.clear();
        self.has_target = target.is_some();
        self.n_rows = df.height();
        self.global_mean = match target {
            Some(t) if !t.is_empty() => t.iter().sum::<f64>() / t.len() as f64,
            _ => 0.0,
        };

        for col_name in columns {
            let mut stats: HashMap<String, CategoryStats> = HashMap::new();
            for (i, value) in category_strings(df, col_name)?.into_iter().enumerate() {
                if let Some(v) = value {
                    let entry = stats.entry(v).or_default();
                    entry.sum += target.map(|t| t[i]).unwrap_or(0.0);
                    entry.count += 1;
                }
            }
            self.stats.push((col_name.clone(), stats));
        }

        self.is_fitted = true;
        Ok(self)
    }

    /// Encode the training frame, excluding each row's own target
    pub fn transform_train(&self, df: &DataFrame, target: Option<&[f64]>) -> Result<DataFrame> {
        self.encode(df, target)
    }

    /// Encode unseen data with plain category means
    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        self.encode(df, None)
    }

    fn encode(&self, df: &DataFrame, leave_out: Option<&[f64]>) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(TabularError::ModelNotFitted);
        }

        let mut result = df.clone();
        for (col_name, stats) in &self.stats {
            let encoded: Vec<f64> = category_strings(df, col_name)?
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let stat = value.as_ref().and_then(|v| stats.get(v));
                    self.encode_value(stat, leave_out.map(|t| t[i]))
                })
                .collect();
            result.with_column(Series::new(col_name.as_str().into(), encoded))?;
        }
        Ok(result)
    }

    fn encode_value(&self, stat: Option<&CategoryStats>, own_target: Option<f64>) -> f64 {
        let Some(stat) = stat else {
            return if self.has_target { self.global_mean } else { 0.0 };
        };
        if !self.has_target {
            return stat.count as f64 / self.n_rows.max(1) as f64;
        }
        match own_target {
            Some(y) if stat.count > 1 => (stat.sum - y) / (stat.count - 1) as f64,
            Some(_) => self.global_mean,
            None => stat.sum / stat.count as f64,
        }
    }
}

/// Class label encoder for classification targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    /// Fit on a target column; classes are sorted
    pub fn fit(df: &DataFrame, column: &str) -> Result<Self> {
        let classes: BTreeSet<String> = category_strings(df, column)?.into_iter().flatten().collect();
        Ok(Self {
            classes: classes.into_iter().collect(),
        })
    }

    /// Class index per row; None for nulls and unseen labels
    pub fn transform(&self, df: &DataFrame, column: &str) -> Result<Vec<Option<usize>>> {
        Ok(category_strings(df, column)?
            .into_iter()
            .map(|v| v.and_then(|label| self.index_of(&label)))
            .collect())
    }

    /// Index of a class label
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .ok()
    }

    /// Sorted class labels
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_df() -> DataFrame {
        df! {
            "color" => &[Some("red"), Some("blue"), Some("red"), Some("green"), None, Some("red")],
            "size" => &[1i64, 2, 1, 3, 2, 1],
        }
        .unwrap()
    }

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ordinal_reserves_unknown_code() {
        let df = create_test_df();
        let mut encoder = OrdinalEncoder::new();
        encoder.fit(&df, &names(&["color", "size"])).unwrap();
        assert_eq!(encoder.cardinalities(), vec![3, 3]);

        let codes = encoder.transform(&df).unwrap();
        // sorted: blue=1, green=2, red=3
        assert_eq!(codes[[0, 0]], 3);
        assert_eq!(codes[[1, 0]], 1);
        assert_eq!(codes[[4, 0]], UNKNOWN_CODE);
        assert_eq!(codes[[3, 1]], 3);

        let unseen = df! { "color" => &["purple"], "size" => &[9i64] }.unwrap();
        let codes = encoder.transform(&unseen).unwrap();
        assert_eq!(codes.row(0).to_vec(), vec![UNKNOWN_CODE, UNKNOWN_CODE]);
    }

    #[test]
    fn test_leave_one_out_excludes_own_row() {
        let df = create_test_df();
        let target = [1.0, 10.0, 3.0, 5.0, 7.0, 5.0];
        let mut encoder = LeaveOneOutEncoder::new();
        encoder.fit(&df, &names(&["color"]), Some(&target)).unwrap();

        let train = encoder.transform_train(&df, Some(&target)).unwrap();
        let col = train.column("color").unwrap().f64().unwrap();
        // red rows: targets 1, 3, 5
        assert_eq!(col.get(0), Some(4.0));
        assert_eq!(col.get(2), Some(3.0));
        // singleton and null categories fall back to the global mean
        assert_eq!(col.get(1), Some(31.0 / 6.0));
        assert_eq!(col.get(4), Some(31.0 / 6.0));

        let test = encoder.transform(&df).unwrap();
        let col = test.column("color").unwrap().f64().unwrap();
        assert_eq!(col.get(0), Some(3.0));
    }

    #[test]
    fn test_frequency_fallback_without_target() {
        let df = create_test_df();
        let mut encoder = LeaveOneOutEncoder::new();
        encoder.fit(&df, &names(&["color"]), None).unwrap();
        let out = encoder.transform(&df).unwrap();
        let col = out.column("color").unwrap().f64().unwrap();
        assert_eq!(col.get(0), Some(0.5));
        assert_eq!(col.get(4), Some(0.0));
    }

    #[test]
    fn test_label_encoder() {
        let df = df! { "label" => &["b", "a", "c", "a"] }.unwrap();
        let encoder = LabelEncoder::fit(&df, "label").unwrap();
        assert_eq!(encoder.classes(), &["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(
            encoder.transform(&df, "label").unwrap(),
            vec![Some(1), Some(0), Some(2), Some(0)]
        );
        assert_eq!(encoder.index_of("z"), None);
    }
}
