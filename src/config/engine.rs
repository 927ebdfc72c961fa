//! Engine configuration: orchestrator tuning and default tenant policy.

use serde::Deserialize;
use std::time::Duration;

use crate::application::OrchestratorSettings;
use crate::domain::session::TenantConfig;

use super::error::ConfigValidationError;

/// Engine section of the application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Classifier results below this confidence degrade to unclear.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,

    /// Seconds before an unanswered digression auto-returns.
    #[serde(default = "default_digression_return_secs")]
    pub digression_return_secs: u64,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Default three-strike threshold for new tenants.
    #[serde(default = "default_confirmation_threshold")]
    pub confirmation_threshold: u32,

    /// Default classification retry budget for new tenants.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Default session inactivity timeout for new tenants.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Default digression depth bound for new tenants.
    #[serde(default = "default_max_digression_depth")]
    pub max_digression_depth: usize,
}

fn default_confidence_floor() -> f32 {
    0.35
}

fn default_digression_return_secs() -> u64 {
    20
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_confirmation_threshold() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    5
}

fn default_session_timeout_secs() -> u64 {
    300
}

fn default_max_digression_depth() -> usize {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            digression_return_secs: default_digression_return_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            confirmation_threshold: default_confirmation_threshold(),
            max_retries: default_max_retries(),
            session_timeout_secs: default_session_timeout_secs(),
            max_digression_depth: default_max_digression_depth(),
        }
    }
}

impl EngineConfig {
    /// Validates value ranges.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(ConfigValidationError::new(
                "engine.confidence_floor",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.confirmation_threshold == 0 {
            return Err(ConfigValidationError::new(
                "engine.confirmation_threshold",
                "must be at least 1",
            ));
        }
        if self.session_timeout_secs == 0 {
            return Err(ConfigValidationError::new(
                "engine.session_timeout_secs",
                "must be at least 1",
            ));
        }
        if self.max_digression_depth == 0 {
            return Err(ConfigValidationError::new(
                "engine.max_digression_depth",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Orchestrator settings derived from this configuration.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            confidence_floor: self.confidence_floor,
            digression_return: Duration::from_secs(self.digression_return_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }

    /// Default tenant policy for sessions that do not override it.
    pub fn default_tenant(&self) -> TenantConfig {
        TenantConfig {
            confirmation_threshold: self.confirmation_threshold,
            max_retries: self.max_retries,
            session_timeout_secs: self.session_timeout_secs,
            max_digression_depth: self.max_digression_depth,
            ..TenantConfig::default()
        }
    }
}
