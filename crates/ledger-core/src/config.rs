use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY};
use crate::error::ConfigError;

/// Tunables for a [`crate::ledger::Ledger`]. Every field has a default so a
/// partial TOML table deserializes cleanly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Leading `'0'` hex characters required of every block hash, genesis included.
    pub difficulty: usize,
    /// Upper bound on nonce trials per mining attempt. `None` searches forever.
    pub max_iterations: Option<u64>,
    /// Wall-clock budget per mining attempt in milliseconds.
    pub deadline_ms: Option<u64>,
    /// Spread the nonce search over the rayon thread pool.
    pub parallel: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            max_iterations: None,
            deadline_ms: None,
            parallel: false,
        }
    }
}

impl LedgerConfig {
    pub fn with_difficulty(difficulty: usize) -> Self {
        Self {
            difficulty,
            ..Self::default()
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::DifficultyTooHigh {
                difficulty: self.difficulty,
                max: MAX_DIFFICULTY,
            });
        }
        if self.max_iterations == Some(0) {
            return Err(ConfigError::ZeroIterations);
        }
        Ok(())
    }
}
