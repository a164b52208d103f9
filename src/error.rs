//! Error types for Kolosal Tabular

use thiserror::Error;

/// Result type alias for Kolosal Tabular operations
pub type Result<T> = std::result::Result<T, TabularError>;

/// Coarse classification of a [`TabularError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration or hyperparameter combination
    Config,
    /// Input table does not match the configured schema
    Data,
    /// Operation invoked out of lifecycle order
    State,
    /// Requested artefact does not exist on the model
    Key,
    /// Numerical failure inside the training loop
    Training,
    /// Filesystem failure
    Io,
    /// (De)serialization failure
    Serialization,
}

/// Main error type for the framework
#[derive(Error, Debug)]
pub enum TabularError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("State error: {0}")]
    StateError(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl TabularError {
    /// Shorthand for an [`TabularError::InvalidParameter`]
    pub fn invalid_parameter(
        name: impl Into<String>,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        TabularError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// The taxonomy bucket this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            TabularError::ConfigError(_) | TabularError::InvalidParameter { .. } => ErrorKind::Config,
            TabularError::DataError(_)
            | TabularError::FeatureNotFound(_)
            | TabularError::ShapeError { .. } => ErrorKind::Data,
            TabularError::ModelNotFitted | TabularError::StateError(_) => ErrorKind::State,
            TabularError::KeyError(_) => ErrorKind::Key,
            TabularError::TrainingError(_) => ErrorKind::Training,
            TabularError::IoError(_) => ErrorKind::Io,
            TabularError::SerializationError(_) => ErrorKind::Serialization,
        }
    }
}

impl From<polars::error::PolarsError> for TabularError {
    fn from(err: polars::error::PolarsError) -> Self {
        TabularError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for TabularError {
    fn from(err: serde_json::Error) -> Self {
        TabularError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for TabularError {
    fn from(err: ndarray::ShapeError) -> Self {
        TabularError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TabularError::DataError("test error".to_string());
        assert_eq!(err.to_string(), "Data error: test error");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TabularError = io_err.into();
        assert!(matches!(err, TabularError::IoError(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(TabularError::ModelNotFitted.kind(), ErrorKind::State);
        assert_eq!(TabularError::FeatureNotFound("x".into()).kind(), ErrorKind::Data);
        assert_eq!(
            TabularError::invalid_parameter("depth", 0, "must be positive").kind(),
            ErrorKind::Config
        );
        assert_eq!(TabularError::KeyError("embeddings".into()).kind(), ErrorKind::Key);
    }
}
