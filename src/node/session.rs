//! Session orchestrator
//!
//! Drives the node through `Stopped → Starting → Ready{locked|unlocked} →
//! Stopping → Stopped`, plus a sticky `Faulted` phase. All transitions run
//! under a single-owner guard: [`SessionOrchestrator::begin`] hands out a
//! [`Session`] or fails with `Busy`, so a backup cannot interleave with an
//! account switch. The current phase is published on a watch channel and can
//! be read without the guard.
//!
//! While a local node is up, an exit monitor faults the session if the
//! process goes away without being asked to.

use super::config::NodeConfig;
use super::events::{EventBus, PROCESS_STOPPED};
use super::launcher::LocalNodeLauncher;
use super::manager::{ProcessSupervisor, Readiness, SupervisorError, SupervisorTimeouts};
use super::rpc::{ApiError, ControlApi, NodeApiClient, NodeInfo};
use super::state::{LockState, Phase, SessionMode, SessionSnapshot};
use crate::account::Account;
use crate::error::SessionError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Instant;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use url::Url;
use zeroize::Zeroizing;

/// Session details readable without the guard
#[derive(Debug, Default)]
struct SessionInfo {
    account: Option<String>,
    mode: Option<SessionMode>,
    pid: Option<u32>,
    since: Option<Instant>,
}

/// State owned by whoever holds the guard
struct SessionInner {
    supervisor: ProcessSupervisor,
    api: Box<dyn ControlApi>,
    account: Option<Account>,
    data_root: PathBuf,
    /// Cancels the exit monitor of the running node
    exit_monitor: Option<CancellationToken>,
}

/// Owner of the single node session
pub struct SessionOrchestrator {
    inner: Mutex<SessionInner>,
    phase_tx: Arc<watch::Sender<Phase>>,
    info: Arc<StdMutex<SessionInfo>>,
}

impl SessionOrchestrator {
    pub fn new(supervisor: ProcessSupervisor, api: Box<dyn ControlApi>, data_root: PathBuf) -> Self {
        let (phase_tx, _) = watch::channel(Phase::Stopped);
        Self {
            inner: Mutex::new(SessionInner {
                supervisor,
                api,
                account: None,
                data_root,
                exit_monitor: None,
            }),
            phase_tx: Arc::new(phase_tx),
            info: Arc::default(),
        }
    }

    /// Build an orchestrator that spawns the real node binary
    pub fn from_config(config: &NodeConfig, events: EventBus) -> Result<Self, SessionError> {
        let launcher = LocalNodeLauncher::new(config, events.clone());
        let supervisor = ProcessSupervisor::new(Box::new(launcher), events, SupervisorTimeouts::from(config));

        let endpoint = Url::parse("http://127.0.0.1:3001/")
            .map_err(|e| ApiError::Transport(format!("Invalid default endpoint: {}", e)))?;
        let api = NodeApiClient::new(endpoint, config.request_timeout())?;

        Ok(Self::new(supervisor, Box::new(api), config.data_root()))
    }

    /// Acquire the session guard, or `Busy` if another operation holds it
    pub fn begin(&self) -> Result<Session<'_>, SessionError> {
        let inner = self.inner.try_lock().map_err(|_| SessionError::Busy)?;
        Ok(Session {
            inner,
            phase_tx: &self.phase_tx,
            info: &self.info,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase_tx.borrow().clone()
    }

    /// Observe phase changes
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let info = self.info.lock().unwrap_or_else(|e| e.into_inner());
        SessionSnapshot {
            phase: self.phase(),
            account: info.account.clone(),
            mode: info.mode,
            pid: info.pid,
            uptime: info.since.map(|since| since.elapsed().as_secs()),
        }
    }

    pub async fn start(&self, account: &Account, cancel: &CancellationToken) -> Result<Phase, SessionError> {
        self.begin()?.start(account, cancel).await
    }

    pub async fn attach_remote(&self, account: &Account) -> Result<Phase, SessionError> {
        self.begin()?.attach_remote(account).await
    }

    pub async fn unlock(&self, password: &str) -> Result<Phase, SessionError> {
        self.begin()?.unlock(password).await
    }

    pub async fn lock(&self) -> Result<Phase, SessionError> {
        self.begin()?.lock().await
    }

    pub async fn init(&self, password: &str) -> Result<Zeroizing<String>, SessionError> {
        self.begin()?.init(password).await
    }

    pub async fn restore(&self, backup: &Path, password: &str) -> Result<Phase, SessionError> {
        self.begin()?.restore(backup, password).await
    }

    pub async fn status(&self) -> Result<NodeInfo, SessionError> {
        self.begin()?.status().await
    }

    pub async fn stop(&self, cancel: &CancellationToken) -> Result<Phase, SessionError> {
        self.begin()?.stop(cancel).await
    }

    pub async fn logout(&self, cancel: &CancellationToken) -> Result<Phase, SessionError> {
        self.begin()?.logout(cancel).await
    }

    pub async fn reset(&self) -> Result<Phase, SessionError> {
        self.begin()?.reset().await
    }
}

/// Exclusive access to the session; released when dropped
pub struct Session<'a> {
    inner: MutexGuard<'a, SessionInner>,
    phase_tx: &'a Arc<watch::Sender<Phase>>,
    info: &'a Arc<StdMutex<SessionInfo>>,
}

impl Session<'_> {
    pub fn phase(&self) -> Phase {
        self.phase_tx.borrow().clone()
    }

    /// Name of the account the session is bound to
    pub fn account_name(&self) -> Option<&str> {
        self.inner.account.as_ref().map(|a| a.name.as_str())
    }

    pub fn mode(&self) -> Option<SessionMode> {
        self.info().mode
    }

    /// Captured output of the local node
    pub fn node_logs(&self) -> Vec<String> {
        self.inner.supervisor.logs()
    }

    pub fn save_node_logs(&self, path: &Path) -> Result<(), SessionError> {
        Ok(self.inner.supervisor.save_logs(path)?)
    }

    fn info(&self) -> StdMutexGuard<'_, SessionInfo> {
        self.info.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, next: Phase) {
        let previous = self.phase_tx.send_replace(next.clone());
        if previous != next {
            log::info!("Node session: {} -> {}", previous, next);
        }
    }

    fn fault(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::error!("Node session faulted: {}", reason);
        self.transition(Phase::Faulted { reason });
    }

    fn bind(&mut self, account: Option<&Account>, mode: Option<SessionMode>) {
        self.inner.account = account.cloned();
        let pid = self.inner.supervisor.pid();
        let mut info = self.info();
        info.account = account.map(|a| a.name.clone());
        info.mode = mode;
        info.pid = pid;
        info.since = account.map(|_| Instant::now());
    }

    /// Fault the session if the node exits while nobody is stopping it
    fn monitor_exit(&mut self) {
        self.stop_exit_monitor();

        let mut stopped = self.inner.supervisor.events().watch(&[PROCESS_STOPPED]);
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let phase_tx = Arc::clone(self.phase_tx);
        let info = Arc::clone(self.info);

        tokio::spawn(async move {
            let event = tokio::select! {
                biased;
                _ = cancelled.cancelled() => return,
                event = stopped.next_event() => event,
            };

            let reason = format!("node exited unexpectedly ({})", event.payload);
            let faulted = phase_tx.send_if_modified(|phase| {
                if phase.is_ready() {
                    *phase = Phase::Faulted {
                        reason: reason.clone(),
                    };
                    true
                } else {
                    false
                }
            });
            if faulted {
                log::error!("Node session faulted: {}", reason);
                info.lock().unwrap_or_else(|e| e.into_inner()).pid = None;
            }
        });

        self.inner.exit_monitor = Some(token);
    }

    fn stop_exit_monitor(&mut self) {
        if let Some(token) = self.inner.exit_monitor.take() {
            token.cancel();
        }
    }

    /// Fail with `Faulted` while the session is faulted
    pub fn ensure_not_faulted(&self) -> Result<(), SessionError> {
        match self.phase() {
            Phase::Faulted { reason } => Err(SessionError::Faulted { reason }),
            _ => Ok(()),
        }
    }

    fn require_phase(&self, operation: &'static str, expected: fn(&Phase) -> bool) -> Result<Phase, SessionError> {
        self.ensure_not_faulted()?;
        let phase = self.phase();
        if expected(&phase) {
            Ok(phase)
        } else {
            Err(SessionError::InvalidPhase { operation, phase })
        }
    }

    fn require_ready(&self, operation: &'static str) -> Result<LockState, SessionError> {
        let phase = self.require_phase(operation, Phase::is_ready)?;
        phase
            .lock_state()
            .ok_or(SessionError::InvalidPhase { operation, phase })
    }

    /// Map an error the current transition does not handle itself
    fn api_failure(&self, err: ApiError) -> SessionError {
        match err {
            ApiError::WrongPassword => SessionError::WrongPassword,
            ApiError::NotInitialized => SessionError::NotInitialized,
            ApiError::Precondition(_) => SessionError::Api(err),
            ApiError::Transport(_) | ApiError::Status { .. } | ApiError::Decode(_) => {
                self.fault(err.to_string());
                SessionError::Api(err)
            }
        }
    }

    /// Whether the control API answers at all
    async fn probe(&self) -> bool {
        match self.inner.api.status().await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("Liveness probe: {}", e);
                e.is_reachable()
            }
        }
    }

    /// Spawn the node for a local account and wait until its API is up
    pub async fn start(&mut self, account: &Account, cancel: &CancellationToken) -> Result<Phase, SessionError> {
        self.require_phase("start", |p| *p == Phase::Stopped)?;

        let params = account
            .launch_params(&self.inner.data_root)
            .ok_or_else(|| SessionError::NotLocal {
                account: account.name.clone(),
            })?;
        let endpoint = account.control_api_url()?;
        self.inner.api.set_endpoint(endpoint);

        self.transition(Phase::Starting);
        let started = self.inner.supervisor.start(&params, cancel).await;
        match started {
            Ok(Readiness::Signalled) => {}
            Ok(Readiness::TimedOut) => {
                let timeout = self.inner.supervisor.timeouts().start;
                log::warn!("No ready signal from node within {:?}, probing control API", timeout);
                if !self.probe().await {
                    if let Err(e) = self.inner.supervisor.force_stop().await {
                        log::error!("Unresponsive node for '{}' survived kill: {}", account.name, e);
                    }
                    self.bind(Some(account), Some(SessionMode::Local));
                    self.fault(format!("node did not become ready within {:?}", timeout));
                    return Err(SessionError::StartTimeout { timeout });
                }
            }
            Err(SupervisorError::Cancelled) => {
                self.bind(None, None);
                self.transition(Phase::Stopped);
                return Err(SessionError::Cancelled);
            }
            Err(SupervisorError::ExitedDuringStartup { status }) => {
                self.bind(None, None);
                self.transition(Phase::Stopped);
                return Err(SessionError::ExitedDuringStartup { status });
            }
            Err(SupervisorError::Launch(e)) => {
                self.transition(Phase::Stopped);
                return Err(SessionError::Launch(e));
            }
            Err(SupervisorError::StopTimeout { timeout }) => {
                self.bind(Some(account), Some(SessionMode::Local));
                self.fault(format!("node did not stop within {:?}", timeout));
                return Err(SessionError::StopTimeout { timeout });
            }
            Err(e @ SupervisorError::AlreadyRunning { .. }) => {
                self.fault(e.to_string());
                return Err(SessionError::Faulted { reason: e.to_string() });
            }
        }

        self.bind(Some(account), Some(SessionMode::Local));
        self.transition(Phase::locked());
        self.monitor_exit();
        Ok(self.phase())
    }

    /// Target a node managed elsewhere; no process is spawned
    pub async fn attach_remote(&mut self, account: &Account) -> Result<Phase, SessionError> {
        self.require_phase("connect", |p| *p == Phase::Stopped)?;

        let endpoint = account.control_api_url()?;
        log::info!("Connecting to remote node for '{}' at {}", account.name, endpoint);
        self.inner.api.set_endpoint(endpoint);
        self.transition(Phase::Starting);

        // nodeinfo only answers while unlocked; any other HTTP answer means locked
        let lock = match self.inner.api.status().await {
            Ok(_) => LockState::Unlocked,
            Err(e) if e.is_reachable() => LockState::Locked,
            Err(e) => {
                log::warn!("Remote node for '{}' is unreachable: {}", account.name, e);
                self.transition(Phase::Stopped);
                return Err(SessionError::Api(e));
            }
        };

        self.bind(Some(account), Some(SessionMode::Remote));
        self.transition(Phase::Ready { lock });
        Ok(self.phase())
    }

    /// Unlock the wallet with the bound account's credentials.
    ///
    /// A no-op when already unlocked; "already unlocked" from the node is
    /// also success. A wrong password leaves the session locked.
    pub async fn unlock(&mut self, password: &str) -> Result<Phase, SessionError> {
        if self.require_ready("unlock")? == LockState::Unlocked {
            log::debug!("Node is already unlocked");
            return Ok(self.phase());
        }

        let account = self.inner.account.as_ref().ok_or(SessionError::InvalidPhase {
            operation: "unlock",
            phase: self.phase(),
        })?;
        let request = account.unlock_request(password)?;

        match self.inner.api.unlock(&request).await {
            Ok(()) => {}
            Err(ApiError::Precondition(message)) => {
                log::info!("Unlock treated as success: {}", message);
            }
            Err(e) => return Err(self.api_failure(e)),
        }

        self.transition(Phase::unlocked());
        Ok(self.phase())
    }

    /// Lock without faulting; errors leave the phase unchanged
    pub async fn try_lock(&mut self) -> Result<(), ApiError> {
        match self.inner.api.lock().await {
            Ok(()) => {}
            Err(ApiError::Precondition(message)) => {
                log::info!("Lock treated as success: {}", message);
            }
            Err(e) => return Err(e),
        }
        self.transition(Phase::locked());
        Ok(())
    }

    /// Lock the wallet; "already locked" is success
    pub async fn lock(&mut self) -> Result<Phase, SessionError> {
        self.require_ready("lock")?;
        if let Err(e) = self.try_lock().await {
            return Err(self.api_failure(e));
        }
        Ok(self.phase())
    }

    /// Create the wallet; returns the recovery mnemonic
    pub async fn init(&mut self, password: &str) -> Result<Zeroizing<String>, SessionError> {
        self.require_ready("init")?;
        match self.inner.api.init(password).await {
            Ok(mnemonic) => {
                log::info!("Wallet initialized");
                Ok(mnemonic)
            }
            Err(ApiError::Precondition(_)) => Err(SessionError::AlreadyInitialized),
            Err(e) => Err(self.api_failure(e)),
        }
    }

    /// Restore wallet state from an encrypted backup
    pub async fn restore(&mut self, backup: &Path, password: &str) -> Result<Phase, SessionError> {
        self.require_ready("restore")?;
        log::info!("Restoring wallet from {}", backup.display());
        match self.inner.api.restore(backup, password).await {
            Ok(()) => {
                self.transition(Phase::locked());
                Ok(self.phase())
            }
            Err(e) => Err(self.api_failure(e)),
        }
    }

    /// Raw backup call; the caller decides how to recover
    pub async fn write_backup(&mut self, destination: &Path, password: &str) -> Result<(), ApiError> {
        self.inner.api.backup(destination, password).await
    }

    pub async fn status(&mut self) -> Result<NodeInfo, SessionError> {
        self.require_ready("query status")?;
        match self.inner.api.status().await {
            Ok(info) => Ok(info),
            Err(e) => Err(self.api_failure(e)),
        }
    }

    /// Stop the local node (or detach from a remote one)
    pub async fn stop(&mut self, cancel: &CancellationToken) -> Result<Phase, SessionError> {
        self.ensure_not_faulted()?;
        match self.phase() {
            Phase::Stopped => return Ok(Phase::Stopped),
            Phase::Ready { .. } => {}
            phase => {
                return Err(SessionError::InvalidPhase {
                    operation: "stop",
                    phase,
                })
            }
        }

        if self.mode() == Some(SessionMode::Remote) {
            log::info!("Disconnecting from remote node");
            self.bind(None, None);
            self.transition(Phase::Stopped);
            return Ok(Phase::Stopped);
        }

        self.stop_exit_monitor();
        self.transition(Phase::Stopping);
        match self.inner.supervisor.stop(cancel).await {
            Ok(()) => {
                self.bind(None, None);
                self.transition(Phase::Stopped);
                Ok(Phase::Stopped)
            }
            Err(SupervisorError::StopTimeout { timeout }) => {
                self.fault(format!("node did not stop within {:?}", timeout));
                Err(SessionError::StopTimeout { timeout })
            }
            Err(e) => {
                self.fault(e.to_string());
                Err(SessionError::Faulted { reason: e.to_string() })
            }
        }
    }

    /// Best-effort lock, then shut the node down and stop it
    pub async fn logout(&mut self, cancel: &CancellationToken) -> Result<Phase, SessionError> {
        self.ensure_not_faulted()?;
        if self.phase().lock_state() == Some(LockState::Unlocked) {
            if let Err(e) = self.try_lock().await {
                log::warn!("Lock before logout failed: {}", e);
            }
        }
        if self.phase().is_ready() && self.mode() == Some(SessionMode::Local) {
            self.request_shutdown(cancel).await;
        }
        self.stop(cancel).await
    }

    /// Ask the node to exit on its own; bounded by the stop timeout
    async fn request_shutdown(&mut self, cancel: &CancellationToken) {
        self.stop_exit_monitor();
        let limit = self.inner.supervisor.timeouts().stop;
        tokio::select! {
            result = tokio::time::timeout(limit, self.inner.api.shutdown()) => match result {
                Ok(Ok(())) => log::info!("Node accepted shutdown request"),
                Ok(Err(e)) => log::warn!("Shutdown request failed: {}", e),
                Err(_) => log::warn!("Shutdown request unanswered after {:?}", limit),
            },
            _ = cancel.cancelled() => log::warn!("Shutdown request cancelled"),
        }
    }

    /// Force-stop whatever runs and return to `Stopped`
    pub async fn reset(&mut self) -> Result<Phase, SessionError> {
        log::info!("Resetting node session (was {})", self.phase());
        self.stop_exit_monitor();
        match self.inner.supervisor.force_stop().await {
            Ok(()) => {}
            Err(SupervisorError::StopTimeout { timeout }) => {
                self.fault(format!("node survived reset for {:?}", timeout));
                return Err(SessionError::StopTimeout { timeout });
            }
            Err(e) => {
                self.fault(e.to_string());
                return Err(SessionError::Faulted { reason: e.to_string() });
            }
        }

        self.bind(None, None);
        self.transition(Phase::Stopped);
        Ok(Phase::Stopped)
    }
}
