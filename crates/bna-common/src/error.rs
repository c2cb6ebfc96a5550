//! Error types for BNA Market

use thiserror::Error;

/// Result type alias for start-up and configuration operations
pub type Result<T> = std::result::Result<T, BnaError>;

/// Errors raised before any pipeline runs
#[derive(Error, Debug)]
pub enum BnaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl BnaError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid value error for a named setting
    pub fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}
