/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed CLI configuration
[POS]:    Configuration layer - node endpoint and local state location
[UPDATE]: When adding new configuration options
*/

use std::path::PathBuf;

use clearnode_adapter::ClientConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the session CLI
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CliConfig {
    /// Ledger node connection and authorization settings
    #[serde(default)]
    pub node: ClientConfig,
    /// File holding session keys, reconnect tokens and open sessions
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            node: ClientConfig::default(),
            state_path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".clearnode/state.json")
}

impl CliConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.node.validate()?;
        Ok(config)
    }
}
