//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A TOML document could not be parsed or deserialized.
    #[error("failed to parse {path}: {source}")]
    ParseError {
        /// File path, or a placeholder for in-memory documents.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A config file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A value is out of range or otherwise invalid.
    #[error("invalid value for {field}: {message}")]
    ValidationError {
        /// Dotted field path (e.g. `framework.lock_timeout_ms`).
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// An environment override could not be parsed.
    #[error("invalid environment variable {var}: {message}")]
    EnvError {
        /// Variable name.
        var: String,
        /// What is wrong with it.
        message: String,
    },

    /// The user's home directory could not be determined.
    #[error("could not determine home directory")]
    NoHomeDir,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
