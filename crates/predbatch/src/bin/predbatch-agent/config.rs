//! Agent configuration.
//!
//! Values come from defaults overridden by `PREDBATCH_`-prefixed environment
//! variables, e.g. `PREDBATCH_ENABLE_BATCHER=true`,
//! `PREDBATCH_MAX_BATCH_SIZE=16`, `PREDBATCH_COMPONENT_PORT=8080`.

use std::collections::HashMap;
use config::{Config, ConfigError, Environment};
use predbatch::BatcherConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading the agent configuration.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Settings of the agent process.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AgentConfig {
    /// Address the agent listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port of the model server on localhost
    #[serde(default = "default_component_port")]
    pub component_port: u16,

    /// Whether predict requests are batched
    #[serde(default)]
    pub enable_batcher: bool,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: i64,

    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: i64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:9081".to_string()
}

fn default_component_port() -> u16 {
    8080
}

fn default_max_batch_size() -> i64 {
    32
}

fn default_max_latency_ms() -> i64 {
    5000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            component_port: default_component_port(),
            enable_batcher: false,
            max_batch_size: default_max_batch_size(),
            max_latency_ms: default_max_latency_ms(),
        }
    }
}

impl AgentConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_source(None)
    }

    /// Loads the configuration from `vars` instead of the process environment.
    pub fn from_source(vars: Option<HashMap<String, String>>) -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&AgentConfig::default())?)
            .add_source(
                Environment::with_prefix("PREDBATCH")
                    .prefix_separator("_")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?;

        let agent_config: AgentConfig = config.try_deserialize()?;
        agent_config.validate()?;
        Ok(agent_config)
    }

    /// Rejects batcher thresholds the operator set to non-positive values.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.component_port == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "component_port must be greater than 0".to_string(),
            });
        }
        if self.enable_batcher && self.max_batch_size <= 0 {
            return Err(ConfigLoadError::Invalid {
                message: format!("invalid max batch size: {}", self.max_batch_size),
            });
        }
        if self.enable_batcher && self.max_latency_ms <= 0 {
            return Err(ConfigLoadError::Invalid {
                message: format!("invalid max latency: {}", self.max_latency_ms),
            });
        }
        Ok(())
    }

    pub fn batcher(&self) -> BatcherConfig {
        BatcherConfig::new(self.max_batch_size, self.max_latency_ms)
    }

    pub fn component_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.component_port)
    }
}
