//! Error types shared across fleetops crates.

use thiserror::Error;

/// Result alias for configuration parsing and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result alias for calls into an external collaborator.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Misconfiguration detected at construction time. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config.{0} is required")]
    Missing(&'static str),

    #[error("health check url is invalid: {0}")]
    HealthCheckUrl(String),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure reported by a collaborator (compute, addresses, metrics, or a
/// traffic backend's wire client).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{operation} failed: {message}")]
    Request { operation: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl ProviderError {
    /// Shorthand for a failed request.
    pub fn request(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
