//! Account switching
//!
//! Tears down the running account's node and brings up another account's,
//! keeping the registry's current-account marker in step. The whole switch
//! runs under one session guard, so nothing else can start a node halfway.

use crate::account::registry::AccountRegistry;
use crate::error::{RegistryError, SwitchError};
use crate::node::{Phase, SessionOrchestrator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AccountSwitchCoordinator {
    session: Arc<SessionOrchestrator>,
    registry: Arc<dyn AccountRegistry>,
}

impl AccountSwitchCoordinator {
    pub fn new(session: Arc<SessionOrchestrator>, registry: Arc<dyn AccountRegistry>) -> Self {
        Self { session, registry }
    }

    /// Make `name` the current account and bring its node up.
    ///
    /// A running node for another account is stopped first; if it does not
    /// stop in time the switch is aborted before the registry is touched. A
    /// failed start leaves the registry pointing at the new account.
    pub async fn switch_to(&self, name: &str, cancel: &CancellationToken) -> Result<Phase, SwitchError> {
        let mut session = self.session.begin()?;
        session.ensure_not_faulted()?;

        let account = self
            .registry
            .get(name)?
            .ok_or_else(|| RegistryError::AccountNotFound {
                name: name.to_string(),
            })?;

        if session.account_name() == Some(name) && session.phase().is_ready() {
            log::info!("Account '{}' is already active", name);
            self.registry.set_current(name)?;
            return Ok(session.phase());
        }

        if session.phase() != Phase::Stopped {
            log::info!(
                "Switching from '{}' to '{}'",
                session.account_name().unwrap_or("<none>"),
                name
            );
            session.stop(cancel).await?;
        }

        self.registry.set_current(name)?;

        let phase = if account.is_local() {
            session.start(&account, cancel).await?
        } else {
            session.attach_remote(&account).await?
        };

        log::info!("Account '{}' is now {}", name, phase);
        Ok(phase)
    }

    /// Bring up the registry's current account, if there is one
    pub async fn resume(&self, cancel: &CancellationToken) -> Result<Option<Phase>, SwitchError> {
        match self.registry.get_current()? {
            Some(account) => {
                log::info!("Resuming account '{}'", account.name);
                self.switch_to(&account.name, cancel).await.map(Some)
            }
            None => {
                log::info!("No current account to resume");
                Ok(None)
            }
        }
    }

    /// Delete an account, stopping its node first if it is the active one
    pub async fn remove_account(&self, name: &str, cancel: &CancellationToken) -> Result<(), SwitchError> {
        let mut session = self.session.begin()?;

        if session.account_name() == Some(name) {
            session.ensure_not_faulted()?;
            session.stop(cancel).await?;
        }

        self.registry.delete(name)?;
        Ok(())
    }
}
