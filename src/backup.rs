//! Wallet backup
//!
//! The node only writes a backup while its wallet is locked, so a backup is a
//! small saga: lock, back up, unlock again. Each step has its own recovery so
//! the session ends in a known phase whichever step fails, and no backup file
//! is left behind unless the whole saga succeeded.

use crate::error::{BackupError, SessionError};
use crate::node::rpc::ApiError;
use crate::node::SessionOrchestrator;
use crate::node::Phase;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Where to write the backup and the password protecting it
pub struct BackupRequest {
    pub destination: PathBuf,
    pub password: Zeroizing<String>,
}

impl BackupRequest {
    pub fn new(destination: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl fmt::Debug for BackupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupRequest")
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// A backup that was written
#[derive(Debug)]
pub struct BackupOutcome {
    pub destination: PathBuf,
    /// Set when the node could not be unlocked again afterwards
    pub warning: Option<BackupError>,
}

/// Runs the lock → backup → unlock saga
pub struct BackupCoordinator {
    session: Arc<SessionOrchestrator>,
}

impl BackupCoordinator {
    pub fn new(session: Arc<SessionOrchestrator>) -> Self {
        Self { session }
    }

    pub async fn run_backup(&self, request: BackupRequest) -> Result<BackupOutcome, BackupError> {
        // `password` is overwritten when dropped at the end of the saga
        let BackupRequest {
            destination,
            password,
        } = request;

        if destination.as_os_str().is_empty() {
            return Err(BackupError::InvalidDestination);
        }
        if destination.exists() {
            return Err(BackupError::DestinationExists { path: destination });
        }

        let mut session = self.session.begin().map_err(|e| match e {
            SessionError::Busy => BackupError::Busy,
            other => BackupError::BackupFailed {
                reason: other.to_string(),
            },
        })?;

        match session.phase() {
            Phase::Ready { .. } => {}
            Phase::Faulted { reason } => return Err(BackupError::Faulted { reason }),
            phase => return Err(BackupError::InvalidPhase { phase }),
        }

        log::info!("Backing up wallet to {}", destination.display());

        if let Err(e) = session.try_lock().await {
            log::warn!("Backup aborted, lock failed: {}", e);
            return Err(BackupError::LockFailed {
                reason: e.to_string(),
            });
        }

        if let Err(e) = session.write_backup(&destination, &password).await {
            log::warn!("Backup to {} failed: {}", destination.display(), e);

            // Try to get back to where we were; a wrong password keeps the node locked
            if let Err(unlock_err) = session.unlock(&password).await {
                log::warn!("Node stays locked after failed backup: {}", unlock_err);
            }
            remove_partial(&destination);

            return Err(match e {
                ApiError::WrongPassword => BackupError::WrongPassword,
                other => BackupError::BackupFailed {
                    reason: other.to_string(),
                },
            });
        }

        log::info!("Backup written to {}", destination.display());

        let warning = match session.unlock(&password).await {
            Ok(_) => None,
            Err(e) => {
                log::warn!("Backup succeeded but unlocking the node failed: {}", e);
                Some(BackupError::PostBackupUnlockFailed {
                    reason: e.to_string(),
                })
            }
        };

        Ok(BackupOutcome {
            destination,
            warning,
        })
    }
}

/// Remove a file the node may have left behind on a failed backup
fn remove_partial(path: &Path) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => log::warn!("Removed incomplete backup at {}", path.display()),
        Err(e) => log::error!("Failed to remove incomplete backup at {}: {}", path.display(), e),
    }
}
