//! Error taxonomy surfaced to the UI layer
//!
//! Component-local errors (`TimedOut`, `LaunchError`, `ApiError`,
//! `SupervisorError`) live next to the component that produces them; the
//! types here are what the orchestrator and the coordinators return.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::node::launcher::LaunchError;
use crate::node::rpc::ApiError;
use crate::node::state::Phase;

/// Errors returned by the session orchestrator
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Another node operation is already in progress")]
    Busy,

    #[error("Node session is faulted ({reason}); reset required")]
    Faulted { reason: String },

    #[error("Cannot {operation} while the session is {phase}")]
    InvalidPhase { operation: &'static str, phase: Phase },

    #[error("Account '{account}' has no local data directory")]
    NotLocal { account: String },

    #[error("Node did not become ready within {timeout:?}")]
    StartTimeout { timeout: Duration },

    #[error("Node did not stop within {timeout:?}")]
    StopTimeout { timeout: Duration },

    #[error("Node exited during startup: {status}")]
    ExitedDuringStartup { status: String },

    #[error("Wrong password")]
    WrongPassword,

    #[error("Wallet has already been initialized")]
    AlreadyInitialized,

    #[error("Wallet has not been initialized")]
    NotInitialized,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid account configuration: {0}")]
    InvalidAccount(#[from] RegistryError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Control API error: {0}")]
    Api(#[from] ApiError),
}

impl SessionError {
    /// Whether the UI should offer a retry-or-abandon prompt
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SessionError::StartTimeout { .. } | SessionError::StopTimeout { .. }
        )
    }
}

/// Errors (and the one warning) produced by the backup saga
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Invalid backup destination")]
    InvalidDestination,

    #[error("Backup file already exists: {}", .path.display())]
    DestinationExists { path: PathBuf },

    #[error("Another node operation is already in progress")]
    Busy,

    #[error("Node session is faulted ({reason}); reset required")]
    Faulted { reason: String },

    #[error("Cannot back up while the session is {phase}")]
    InvalidPhase { phase: Phase },

    #[error("Lock unsuccessful: {reason}")]
    LockFailed { reason: String },

    #[error("Wrong password")]
    WrongPassword,

    #[error("Backup failed: {reason}")]
    BackupFailed { reason: String },

    /// Warning-level: the backup artifact is valid but the node stayed locked
    #[error("Backup written but the node could not be unlocked again: {reason}")]
    PostBackupUnlockFailed { reason: String },
}

/// Errors returned by the account switch coordinator
#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("Another node operation is already in progress")]
    Busy,

    #[error("Node session is faulted ({reason}); reset required")]
    Faulted { reason: String },

    #[error("Running node did not stop within {timeout:?}; switch aborted")]
    StopTimeout { timeout: Duration },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(SessionError),
}

impl From<SessionError> for SwitchError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Busy => SwitchError::Busy,
            SessionError::Faulted { reason } => SwitchError::Faulted { reason },
            SessionError::StopTimeout { timeout } => SwitchError::StopTimeout { timeout },
            other => SwitchError::Session(other),
        }
    }
}

/// Errors from the account registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Account with this name already exists: {name}")]
    AccountExists { name: String },

    #[error("Account not found: {name}")]
    AccountNotFound { name: String },

    #[error("Invalid RPC connection string '{value}' (expected user:password@host:port)")]
    InvalidRpcConnection { value: String },

    #[error("Invalid node URL '{value}': {reason}")]
    InvalidNodeUrl { value: String, reason: String },

    #[error("Failed to access account registry at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse account registry: {0}")]
    Parse(#[from] serde_json::Error),
}
