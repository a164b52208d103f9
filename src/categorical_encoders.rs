//! Learned categorical embeddings as a reusable transform
//!
//! [`CategoricalEmbeddingTransformer`] reads the embedding tables of a model
//! fitted with `embed_categorical = true` and replays them on new frames:
//! every categorical column gains `<column>_embed_dim_<i>` columns holding the
//! vector learned for its category. Categories not seen during training, and
//! nulls, get the column's [`CategoryKey::Unknown`] vector.

use crate::error::{Result, TabularError};
use crate::preprocessing::{category_strings, UNKNOWN_CODE};
use crate::tabular_model::TabularModel;
use ndarray::{Array1, ArrayView1};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Lookup key of an embedding vector
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CategoryKey {
    /// A category observed during training
    Known(String),
    /// Shared slot for unseen or missing categories
    Unknown,
}

/// Embedding vectors of one categorical column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEmbedding {
    column: String,
    known: BTreeMap<String, Array1<f64>>,
    unknown: Array1<f64>,
}

impl ColumnEmbedding {
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Vector length shared by every key
    pub fn dim(&self) -> usize {
        self.unknown.len()
    }

    /// Number of keys, the unknown slot included
    pub fn len(&self) -> usize {
        self.known.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn get(&self, key: &CategoryKey) -> Option<ArrayView1<'_, f64>> {
        match key {
            CategoryKey::Known(value) => self.known.get(value).map(|v| v.view()),
            CategoryKey::Unknown => Some(self.unknown.view()),
        }
    }

    /// Vector for a raw value, falling back to the unknown slot
    pub fn lookup(&self, value: Option<&str>) -> ArrayView1<'_, f64> {
        value
            .and_then(|v| self.known.get(v))
            .unwrap_or(&self.unknown)
            .view()
    }

    /// Every key, known categories in sorted order followed by `Unknown`
    pub fn keys(&self) -> Vec<CategoryKey> {
        self.known
            .keys()
            .cloned()
            .map(CategoryKey::Known)
            .chain(std::iter::once(CategoryKey::Unknown))
            .collect()
    }
}

/// Embedding vectors of every categorical column, in configuration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMapping {
    columns: Vec<ColumnEmbedding>,
}

impl EmbeddingMapping {
    pub fn get(&self, column: &str) -> Option<&ColumnEmbedding> {
        self.columns.iter().find(|c| c.column == column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnEmbedding> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Replays a fitted model's categorical embeddings on new data
#[derive(Debug, Clone)]
pub struct CategoricalEmbeddingTransformer {
    mapping: EmbeddingMapping,
    is_fitted: bool,
}

impl CategoricalEmbeddingTransformer {
    /// Derive the embedding mapping from a model fitted with `embed_categorical = true`
    pub fn new(model: &TabularModel) -> Result<Self> {
        let (network, datamodule) = match (model.network(), model.datamodule()) {
            (Some(network), Some(datamodule)) => (network, datamodule),
            _ => {
                return Err(TabularError::KeyError(
                    "embeddings are unavailable: the model has not been fitted".to_string(),
                ))
            }
        };
        let embedding = network.embedding().ok_or_else(|| {
            TabularError::KeyError(
                "embeddings are unavailable: the model was not fitted with embed_categorical = true"
                    .to_string(),
            )
        })?;

        let encoder = datamodule.ordinal_encoder();
        let mut columns = Vec::with_capacity(embedding.num_columns());
        for (j, column) in datamodule.config().categorical_cols.iter().enumerate() {
            let missing = || TabularError::KeyError(format!("no embedding table for column '{}'", column));
            let categories = encoder.categories(column).ok_or_else(missing)?;
            let unknown = embedding.vector(j, UNKNOWN_CODE).ok_or_else(missing)?.to_owned();

            let mut known = BTreeMap::new();
            for (idx, category) in categories.iter().enumerate() {
                let vector = embedding.vector(j, idx + 1).ok_or_else(missing)?;
                known.insert(category.clone(), vector.to_owned());
            }
            debug!(column = %column, categories = known.len(), dim = unknown.len(), "embedding table extracted");
            columns.push(ColumnEmbedding {
                column: column.clone(),
                known,
                unknown,
            });
        }

        Ok(Self {
            mapping: EmbeddingMapping { columns },
            is_fitted: false,
        })
    }

    pub fn mapping(&self) -> &EmbeddingMapping {
        &self.mapping
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    /// Check that `data` carries every mapped column
    pub fn fit(&mut self, data: &DataFrame) -> Result<&mut Self> {
        for column in self.mapping.columns() {
            if data.column(column.column()).is_err() {
                return Err(TabularError::DataError(format!(
                    "categorical column '{}' is missing from the input data",
                    column.column()
                )));
            }
        }
        self.is_fitted = true;
        Ok(self)
    }

    /// Append `<column>_embed_dim_<i>` columns to `data`
    pub fn transform(&self, data: &DataFrame) -> Result<DataFrame> {
        let mut output = data.clone();
        for embedding in self.mapping.columns() {
            let name = embedding.column();
            if data.column(name).is_err() {
                return Err(TabularError::DataError(format!(
                    "categorical column '{}' is missing from the input data",
                    name
                )));
            }
            let values = category_strings(data, name)?;
            let vectors: Vec<ArrayView1<'_, f64>> =
                values.iter().map(|v| embedding.lookup(v.as_deref())).collect();

            for dim in 0..embedding.dim() {
                let series: Vec<f64> = vectors.iter().map(|v| v[dim]).collect();
                output.with_column(Column::new(format!("{}_embed_dim_{}", name, dim).into(), series))?;
            }
        }
        Ok(output)
    }

    pub fn fit_transform(&mut self, data: &DataFrame) -> Result<DataFrame> {
        self.fit(data)?;
        self.transform(data)
    }

    /// Write the mapping as JSON
    pub fn save_mapping(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(&self.mapping)?)?;
        info!(path = %path.as_ref().display(), columns = self.mapping.len(), "embedding mapping saved");
        Ok(())
    }

    /// Build a transformer from a mapping written by [`Self::save_mapping`]
    pub fn load_mapping(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(Self {
            mapping: serde_json::from_str(&json)?,
            is_fitted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn mapping() -> EmbeddingMapping {
        let mut known = BTreeMap::new();
        known.insert("a".to_string(), array![1.0, 2.0]);
        known.insert("b".to_string(), array![3.0, 4.0]);
        EmbeddingMapping {
            columns: vec![ColumnEmbedding {
                column: "city".to_string(),
                known,
                unknown: array![0.0, 0.0],
            }],
        }
    }

    #[test]
    fn test_keys_include_unknown() {
        let m = mapping();
        let city = m.get("city").unwrap();
        assert_eq!(city.len(), 3);
        assert_eq!(city.keys().last(), Some(&CategoryKey::Unknown));
        assert_eq!(city.get(&CategoryKey::Known("b".into())).unwrap(), array![3.0, 4.0].view());
    }

    #[test]
    fn test_transform_uses_unknown_for_unseen_and_null() {
        let transformer = CategoricalEmbeddingTransformer {
            mapping: mapping(),
            is_fitted: true,
        };
        let df = df! { "city" => &[Some("a"), Some("zzz"), None] }.unwrap();
        let out = transformer.transform(&df).unwrap();
        assert_eq!(out.height(), 3);
        let dim0: Vec<Option<f64>> = out.column("city_embed_dim_0").unwrap().as_materialized_series().f64().unwrap().into_iter().collect();
        assert_eq!(dim0, vec![Some(1.0), Some(0.0), Some(0.0)]);
        assert!(out.column("city").is_ok());
    }

    #[test]
    fn test_fit_rejects_missing_columns() {
        let mut transformer = CategoricalEmbeddingTransformer {
            mapping: mapping(),
            is_fitted: false,
        };
        let df = df! { "other" => &["a"] }.unwrap();
        let err = transformer.fit(&df).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Data);
        assert!(!transformer.is_fitted());
    }

    #[test]
    fn test_mapping_json_roundtrip() {
        let transformer = CategoricalEmbeddingTransformer {
            mapping: mapping(),
            is_fitted: false,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        transformer.save_mapping(&path).unwrap();
        let loaded = CategoricalEmbeddingTransformer::load_mapping(&path).unwrap();
        assert_eq!(loaded.mapping(), transformer.mapping());
    }
}
