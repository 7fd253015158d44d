//! Node configuration: an optional TOML file, then command-line overrides.

use anyhow::{Context, Result};
use ledger_core::LedgerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::constants::DEFAULT_LISTEN;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address to listen on, e.g. 127.0.0.1:5000
    pub listen: String,
    pub ledger: LedgerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("parsing node config")?;
        config.ledger.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("loading {}", path.display()))
    }
}
