//! Node configuration types and persistence
//!
//! Handles loading and saving the orchestrator configuration from disk:
//! where the node binary and data live, and the timeouts that bound every
//! start/stop wait.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the node executable shipped with the wallet
#[cfg(target_os = "windows")]
pub const NODE_BINARY_NAME: &str = "rgb-lightning-node.exe";

#[cfg(not(target_os = "windows"))]
pub const NODE_BINARY_NAME: &str = "rgb-lightning-node";

/// Errors while persisting the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to write config to {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Orchestrator configuration stored in node_config.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    /// Override for the node executable path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,

    /// Root directory holding one data directory per local account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_root: Option<String>,

    /// Directory for wallet and node logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Substring of a node output line that signals the control API is up
    pub ready_marker: String,

    /// How long to wait for the ready marker before probing the API
    pub start_timeout_secs: u64,

    /// How long to wait for the process to exit after SIGTERM
    pub stop_timeout_secs: u64,

    /// Liveness poll interval once the stop timeout has elapsed
    pub stop_poll_interval_ms: u64,

    /// Secondary timeout for the liveness poll after a force kill
    pub stop_grace_secs: u64,

    /// Per-request timeout of the control API client
    pub request_timeout_secs: u64,

    /// Lines of node output kept in memory
    pub log_buffer_lines: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            data_root: None,
            log_dir: None,
            ready_marker: "Listening on".to_string(),
            start_timeout_secs: 15,
            stop_timeout_secs: 10,
            stop_poll_interval_ms: 500,
            stop_grace_secs: 5,
            request_timeout_secs: 60,
            log_buffer_lines: 1000,
        }
    }
}

impl NodeConfig {
    /// Get the path to the node config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("KaleidoSwap")
            .join("node_config.json")
    }

    /// Load config from the default location, or defaults if not found
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`; unreadable or invalid files yield defaults
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("Invalid node config at {}: {}; using defaults", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).map_err(io_err)?;

        log::info!("Node config saved to {}", path.display());
        Ok(())
    }

    /// Path to the node executable
    pub fn node_binary_path(&self) -> PathBuf {
        match self.binary_path.as_deref() {
            Some(path) if !path.is_empty() => PathBuf::from(crate::expand_path(path)),
            _ => crate::app_data_dir().join("bin").join(NODE_BINARY_NAME),
        }
    }

    /// Root under which account data directories are created
    pub fn data_root(&self) -> PathBuf {
        match self.data_root.as_deref() {
            Some(path) if !path.is_empty() => PathBuf::from(crate::expand_path(path)),
            _ => crate::app_data_dir().join("data"),
        }
    }

    /// Directory for log files
    pub fn log_dir(&self) -> PathBuf {
        match self.log_dir.as_deref() {
            Some(path) if !path.is_empty() => PathBuf::from(crate::expand_path(path)),
            _ => crate::app_data_dir().join("logs"),
        }
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
