//! Engine configuration loaded from `config.toml`.
//!
//! ```toml
//! [approval]
//! mode = "auto_edit"
//!
//! [shell]
//! binary = "bash"
//!
//! [execution]
//! termination_grace_ms = 500
//! max_output_bytes = 262144
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anvil_exec::{ExecutionSettings, ShellConfig};
use serde::Deserialize;

use crate::policy::ApprovalMode;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "ANVIL_CONFIG";

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub approval: ApprovalConfig,
    pub shell: Option<ShellConfig>,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub mode: ApprovalMode,
}

/// `[execution]` section. Unset fields keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    pub termination_grace_ms: Option<u64>,
    pub sniff_bytes: Option<usize>,
    pub sniff_chunks: Option<usize>,
    pub event_channel_capacity: Option<usize>,
    pub max_output_bytes: Option<usize>,
}

impl ExecutionConfig {
    #[must_use]
    pub fn settings(&self) -> ExecutionSettings {
        let defaults = ExecutionSettings::default();
        ExecutionSettings {
            termination_grace: self
                .termination_grace_ms
                .map_or(defaults.termination_grace, Duration::from_millis),
            sniff_bytes: self.sniff_bytes.unwrap_or(defaults.sniff_bytes),
            sniff_chunks: self.sniff_chunks.unwrap_or(defaults.sniff_chunks),
        }
    }

    /// Capacity of the scheduler's update channel (at least 1).
    #[must_use]
    pub fn event_channel_capacity(&self) -> usize {
        self.event_channel_capacity
            .unwrap_or(DEFAULT_EVENT_CHANNEL_CAPACITY)
            .max(1)
    }

    #[must_use]
    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl EngineConfig {
    /// Load the config file. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }
}

/// `$ANVIL_CONFIG`, else `<config dir>/anvil/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("anvil").join("config.toml"))
}
