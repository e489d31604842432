//! CourierConfig - startup settings read from TOML
//!
//! ```toml
//! shutdown_timeout_ms = 5000
//!
//! [pool]
//! name = "logic"
//! workers = 8
//!
//! [dispatch]
//! skip_closed_sessions = false
//! ```
//!
//! Every key is optional; missing keys take the defaults shown above.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::worker::{PoolConfig, PoolError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Skip handlers of tasks whose session closed while they were queued.
    pub skip_closed_sessions: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub pool: PoolConfig,
    pub dispatch: DispatchConfig,
    pub shutdown_timeout_ms: u64,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            dispatch: DispatchConfig::default(),
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl CourierConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CourierConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate().map_err(|e| match e {
            PoolError::InvalidConfig(reason) => ConfigError::Invalid(format!("pool: {reason}")),
            other => ConfigError::Invalid(other.to_string()),
        })?;
        if self.shutdown_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "shutdown_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
