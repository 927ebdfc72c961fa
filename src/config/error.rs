//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The underlying source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A loaded value failed validation.
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
}

/// One rejected configuration value.
#[derive(Debug, Clone, Error)]
#[error("invalid configuration value '{field}': {reason}")]
pub struct ConfigValidationError {
    pub field: String,
    pub reason: String,
}

impl ConfigValidationError {
    /// Creates a validation error for a field.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
