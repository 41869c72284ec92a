//! Top-level run configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tripwire_core::{ClientConfig, ServerConfig, TripwireResult};
use tripwire_policy::PolicyConfig;

/// A named composition of client- and server-side policies under test.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub name: String,

    #[serde(default)]
    pub client_policies: Vec<PolicyConfig>,

    #[serde(default)]
    pub server_policies: Vec<PolicyConfig>,
}

/// The whole benchmark description: one client load shape, one server
/// sizing, and the strategies to compare.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub client: ClientConfig,
    pub server: ServerConfig,
    pub strategies: Vec<StrategyConfig>,
}

impl Config {
    /// Parses and normalizes a config document.
    pub fn from_yaml(raw: &str) -> TripwireResult<Self> {
        let mut config: Config = serde_yaml::from_str(raw)?;
        config.client.normalize()?;
        config.server.validate()?;
        Ok(config)
    }

    /// Loads a config file from disk.
    pub fn load(path: &Path) -> TripwireResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }
}
