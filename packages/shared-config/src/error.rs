//! Configuration error types

use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an unparseable value
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
