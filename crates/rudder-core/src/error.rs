//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Chart not found: {path}")]
    ChartNotFound { path: String },

    #[error("Invalid Chart.yaml: {message}")]
    InvalidChart { message: String },

    #[error("Invalid values: {message}")]
    InvalidValues { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("Invalid archive {path}: {message}")]
    InvalidArchive { path: String, message: String },
}

impl CoreError {
    pub fn invalid_values(message: impl Into<String>) -> Self {
        Self::InvalidValues {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
