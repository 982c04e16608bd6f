use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::codec::DEFAULT_VARIABLE;
use crate::error::Error;

/// Tuning for [`HistoryStore`](crate::store::HistoryStore).
///
/// Every key is optional in the TOML file:
///
/// ```toml
/// max_attempts = 8
/// timeout_ms = 30000
/// backoff_base_ms = 10
/// backoff_max_ms = 500
/// variable_name = "window.BENCHMARK_DATA"
/// # jitter_seed = 7
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Optimistic-concurrency attempts before giving up.
    pub max_attempts: u32,
    /// Deadline for one ingest, lock waits included.
    pub timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub variable_name: String,
    /// Fixed seed for backoff jitter; random when unset.
    pub jitter_seed: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            timeout_ms: 30_000,
            backoff_base_ms: 10,
            backoff_max_ms: 500,
            variable_name: DEFAULT_VARIABLE.to_string(),
            jitter_seed: None,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let cfg: StoreConfig = toml::from_str(text).map_err(|e| Error::Input {
            what: "store config".to_string(),
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|e| Error::Input {
            what: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput("max_attempts must be at least 1".to_string()));
        }
        if self.variable_name.trim().is_empty() {
            return Err(Error::InvalidInput("variable_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(factor)
                .min(self.backoff_max_ms),
        )
    }
}
