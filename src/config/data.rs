//! Data schema configuration

use crate::error::{Result, TabularError};
use crate::preprocessing::ContinuousFeatureTransform;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Describes which columns of the input table play which role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Target column names, in output order
    pub target: Vec<String>,

    /// Continuous (numeric) feature columns
    pub continuous_cols: Vec<String>,

    /// Categorical feature columns
    pub categorical_cols: Vec<String>,

    /// Optional distribution transform applied to continuous features
    pub continuous_feature_transform: Option<ContinuousFeatureTransform>,

    /// Whether continuous features are standardised
    pub normalize_continuous_features: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            target: Vec::new(),
            continuous_cols: Vec::new(),
            categorical_cols: Vec::new(),
            continuous_feature_transform: None,
            normalize_continuous_features: true,
        }
    }
}

impl DataConfig {
    /// Create a validated configuration
    pub fn new<T, C, K>(target: T, continuous_cols: C, categorical_cols: K) -> Result<Self>
    where
        T: IntoIterator,
        T::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        let config = Self {
            target: target.into_iter().map(Into::into).collect(),
            continuous_cols: continuous_cols.into_iter().map(Into::into).collect(),
            categorical_cols: categorical_cols.into_iter().map(Into::into).collect(),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Builder method to set the continuous feature transform
    pub fn with_continuous_feature_transform(
        mut self,
        transform: Option<ContinuousFeatureTransform>,
    ) -> Self {
        self.continuous_feature_transform = transform;
        self
    }

    /// Builder method to toggle standardisation of continuous features
    pub fn with_normalize_continuous_features(mut self, normalize: bool) -> Self {
        self.normalize_continuous_features = normalize;
        self
    }

    /// Number of feature columns (continuous + categorical)
    pub fn n_features(&self) -> usize {
        self.continuous_cols.len() + self.categorical_cols.len()
    }

    /// Check the column-role invariants
    pub fn validate(&self) -> Result<()> {
        if self.n_features() == 0 {
            return Err(TabularError::ConfigError(
                "at least one continuous or categorical column is required".to_string(),
            ));
        }

        let groups = [
            ("target", &self.target),
            ("continuous_cols", &self.continuous_cols),
            ("categorical_cols", &self.categorical_cols),
        ];

        let mut seen: HashSet<&str> = HashSet::new();
        for (group, names) in groups {
            let mut local: HashSet<&str> = HashSet::new();
            for name in names.iter() {
                if name.trim().is_empty() {
                    return Err(TabularError::ConfigError(format!(
                        "{} contains an empty column name",
                        group
                    )));
                }
                if !local.insert(name.as_str()) {
                    return Err(TabularError::ConfigError(format!(
                        "column '{}' is listed twice in {}",
                        name, group
                    )));
                }
                if !seen.insert(name.as_str()) {
                    return Err(TabularError::ConfigError(format!(
                        "column '{}' is assigned to more than one role",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_valid_config() {
        let config = DataConfig::new(["y"], ["a", "b"], ["c"]).unwrap();
        assert_eq!(config.n_features(), 3);
        assert!(config.normalize_continuous_features);
        assert!(config.continuous_feature_transform.is_none());
    }

    #[test]
    fn test_overlapping_roles_rejected() {
        let err = DataConfig::new(["a"], ["a", "b"], Vec::<String>::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = DataConfig::new(["y"], ["a"], ["a"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_requires_a_feature() {
        let err = DataConfig::new(["y"], Vec::<String>::new(), Vec::<String>::new()).unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn test_duplicate_within_group_rejected() {
        assert!(DataConfig::new(["y"], ["a", "a"], Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_builder_pattern() {
        let config = DataConfig::new(["y"], ["a"], Vec::<String>::new())
            .unwrap()
            .with_continuous_feature_transform(Some(ContinuousFeatureTransform::YeoJohnson))
            .with_normalize_continuous_features(false);
        assert_eq!(
            config.continuous_feature_transform,
            Some(ContinuousFeatureTransform::YeoJohnson)
        );
        assert!(!config.normalize_continuous_features);
    }
}
