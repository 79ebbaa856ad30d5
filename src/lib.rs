//! KaleidoSwap Wallet backend
//!
//! Supervises a local RGB Lightning node process, drives its locked/unlocked
//! session over the node's control API, and coordinates the multi-step
//! operations (backup, account switch) that have to leave the node in a
//! consistent state no matter which step fails.

use std::path::PathBuf;

pub mod account;
pub mod backup;
pub mod error;
pub mod logging;
pub mod node;
pub mod switch;

pub use account::registry::{AccountRegistry, FileAccountRegistry};
pub use account::{Account, Network, RpcConnection};
pub use backup::{BackupCoordinator, BackupOutcome, BackupRequest};
pub use error::{BackupError, RegistryError, SessionError, SwitchError};
pub use node::{EventBus, NodeConfig, Phase, SessionOrchestrator};
pub use switch::AccountSwitchCoordinator;

/// Application identifier used for per-user directories
pub const APP_IDENTIFIER: &str = "com.kaleidoswap.dev";

/// Root directory for wallet data (node data directories, logs, accounts)
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_IDENTIFIER)
}

/// Expand `~` (Unix) or `%VAR%` (Windows) in a user supplied path
pub fn expand_path(path: &str) -> String {
    #[cfg(windows)]
    {
        let mut result = path.to_string();
        while let Some(start) = result.find('%') {
            let Some(len) = result[start + 1..].find('%') else {
                break;
            };
            let name = &result[start + 1..start + 1 + len];
            match std::env::var(name) {
                Ok(value) => {
                    result = format!("{}{}{}", &result[..start], value, &result[start + 2 + len..]);
                }
                Err(_) => break,
            }
        }
        result
    }

    #[cfg(not(windows))]
    {
        match (path.strip_prefix('~'), dirs::home_dir()) {
            (Some(""), Some(home)) => home.to_string_lossy().to_string(),
            (Some(rest), Some(home)) if rest.starts_with('/') => {
                format!("{}{}", home.display(), rest)
            }
            _ => path.to_string(),
        }
    }
}
