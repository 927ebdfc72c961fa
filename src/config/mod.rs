//! Application configuration module
//!
//! Type-safe configuration loading from environment variables using the
//! `config` and `dotenvy` crates. Values are read with the `BOOKLINE_`
//! prefix and nested sections use double underscores as separators,
//! e.g. `BOOKLINE_ENGINE__CONFIRMATION_THRESHOLD=3`.

mod ai;
mod engine;
mod error;

pub use ai::{AiConfig, AiProvider};
pub use engine::EngineConfig;
pub use error::{ConfigError, ConfigValidationError};

use serde::Deserialize;

/// Root application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Engine tuning and default tenant policy.
    #[serde(default)]
    pub engine: EngineConfig,

    /// AI collaborator configuration.
    #[serde(default)]
    pub ai: AiConfig,
}

impl AppConfig {
    /// Loads configuration from the environment (and `.env` if present).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("BOOKLINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        Ok(app)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.ai.validate()?;
        Ok(())
    }
}
