//! Account registry
//!
//! Key-value store of accounts keyed by name, plus the process-wide
//! "current account" marker. The file-backed implementation keeps everything
//! in one JSON document and writes it through on every mutation.

use super::Account;
use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// CRUD over account records plus the current-account marker
pub trait AccountRegistry: Send + Sync {
    fn list(&self) -> Result<Vec<Account>, RegistryError>;

    fn get(&self, name: &str) -> Result<Option<Account>, RegistryError>;

    /// Insert a new account; names are unique
    fn insert(&self, account: Account) -> Result<(), RegistryError>;

    /// Replace the account with the same name
    fn update(&self, account: Account) -> Result<(), RegistryError>;

    fn delete(&self, name: &str) -> Result<(), RegistryError>;

    fn get_current(&self) -> Result<Option<Account>, RegistryError>;

    /// Mark an existing account as current
    fn set_current(&self, name: &str) -> Result<(), RegistryError>;

    fn clear_current(&self) -> Result<(), RegistryError>;
}

/// On-disk layout of the registry file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryFile {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current: Option<String>,
}

/// JSON-file backed account registry
#[derive(Debug)]
pub struct FileAccountRegistry {
    path: PathBuf,
    data: Mutex<RegistryFile>,
}

impl FileAccountRegistry {
    /// Default location: `<app_data_dir>/accounts.json`
    pub fn default_path() -> PathBuf {
        crate::app_data_dir().join("accounts.json")
    }

    /// Open the registry at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(contents) => {
                let data: RegistryFile = serde_json::from_str(&contents)?;
                log::info!(
                    "Loaded {} account(s) from {}",
                    data.accounts.len(),
                    path.display()
                );
                data
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No account registry at {}, starting empty", path.display());
                RegistryFile::default()
            }
            Err(source) => return Err(RegistryError::Io { path, source }),
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn data(&self) -> MutexGuard<'_, RegistryFile> {
        // A poisoned lock only means a writer panicked mid-update; the file
        // on disk is still the last consistent state.
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to a copy of the data, persist it, then commit in memory
    fn mutate<F>(&self, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut RegistryFile) -> Result<(), RegistryError>,
    {
        let mut guard = self.data();
        let mut next = guard.clone();
        f(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    fn persist(&self, data: &RegistryFile) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, contents).map_err(io_err)?;
        Ok(())
    }
}

impl AccountRegistry for FileAccountRegistry {
    fn list(&self) -> Result<Vec<Account>, RegistryError> {
        Ok(self.data().accounts.clone())
    }

    fn get(&self, name: &str) -> Result<Option<Account>, RegistryError> {
        Ok(self.data().accounts.iter().find(|a| a.name == name).cloned())
    }

    fn insert(&self, account: Account) -> Result<(), RegistryError> {
        self.mutate(|data| {
            if data.accounts.iter().any(|a| a.name == account.name) {
                return Err(RegistryError::AccountExists { name: account.name });
            }
            log::info!("Adding account '{}'", account.name);
            data.accounts.push(account);
            Ok(())
        })
    }

    fn update(&self, account: Account) -> Result<(), RegistryError> {
        self.mutate(|data| {
            let slot = data
                .accounts
                .iter_mut()
                .find(|a| a.name == account.name)
                .ok_or_else(|| RegistryError::AccountNotFound {
                    name: account.name.clone(),
                })?;
            *slot = account;
            Ok(())
        })
    }

    fn delete(&self, name: &str) -> Result<(), RegistryError> {
        self.mutate(|data| {
            let before = data.accounts.len();
            data.accounts.retain(|a| a.name != name);
            if data.accounts.len() == before {
                return Err(RegistryError::AccountNotFound {
                    name: name.to_string(),
                });
            }
            if data.current.as_deref() == Some(name) {
                data.current = None;
            }
            log::info!("Deleted account '{}'", name);
            Ok(())
        })
    }

    fn get_current(&self) -> Result<Option<Account>, RegistryError> {
        let data = self.data();
        Ok(data
            .current
            .as_deref()
            .and_then(|name| data.accounts.iter().find(|a| a.name == name))
            .cloned())
    }

    fn set_current(&self, name: &str) -> Result<(), RegistryError> {
        self.mutate(|data| {
            if !data.accounts.iter().any(|a| a.name == name) {
                return Err(RegistryError::AccountNotFound {
                    name: name.to_string(),
                });
            }
            data.current = Some(name.to_string());
            Ok(())
        })
    }

    fn clear_current(&self) -> Result<(), RegistryError> {
        self.mutate(|data| {
            data.current = None;
            Ok(())
        })
    }
}
