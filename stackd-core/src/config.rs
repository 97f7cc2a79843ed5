//! Configuration management.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, StackdError};

/// Persistent configuration for stackd.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bounded attempts for a version-guarded snapshot commit.
    pub commit_retries: u32,
    pub log_level: String,
    /// Socket of the downstream orchestrator; consumed by the surrounding
    /// tooling, not by the reconciler core.
    pub socket_path: String,
    /// Listen port of the stack CRUD API; also a collaborator concern.
    pub listen_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            commit_retries: 5,
            log_level: "info".to_string(),
            socket_path: "/var/run/docker.sock".to_string(),
            listen_port: 8080,
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("STACKD_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".stackd").join("config.json")
    }

    /// Load configuration from disk.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| StackdError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        serde_json::from_str(&content).map_err(|e| StackdError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StackdError::InvalidConfig {
                reason: format!("Failed to create {}: {}", parent.display(), e),
            })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            StackdError::InvalidConfig { reason: format!("Failed to serialize config: {}", e) }
        })?;
        std::fs::write(&path, content).map_err(|e| StackdError::InvalidConfig {
            reason: format!("Failed to write config: {}", e),
        })
    }
}
