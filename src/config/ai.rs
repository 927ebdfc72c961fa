//! AI collaborator configuration.

use serde::Deserialize;
use std::time::Duration;

use super::error::ConfigValidationError;

/// Which classifier/generator backend to wire up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    /// Anthropic Messages API.
    Anthropic,
    /// Scripted mocks; for tests and local development.
    Mock,
}

/// AI section of the application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    /// Backend selection.
    #[serde(default = "default_provider")]
    pub provider: AiProvider,

    /// API key; required for the Anthropic provider.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> AiProvider {
    AiProvider::Mock
}

fn default_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AiConfig {
    /// Validates provider requirements.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.provider == AiProvider::Anthropic
            && self.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigValidationError::new(
                "ai.api_key",
                "required when ai.provider is anthropic",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigValidationError::new(
                "ai.timeout_secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_needs_no_key() {
        assert!(AiConfig::default().validate().is_ok());
    }

    #[test]
    fn anthropic_provider_requires_a_key() {
        let config = AiConfig {
            provider: AiProvider::Anthropic,
            ..AiConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AiConfig {
            provider: AiProvider::Anthropic,
            api_key: Some("sk-test".to_string()),
            ..AiConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
