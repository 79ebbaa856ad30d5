//! Node process supervision
//!
//! Starts the node for an account and confirms readiness through the event
//! bus; stops it and confirms termination, falling back to a liveness poll
//! when the stop signal never arrives. At most one process is live at a time.

use super::config::NodeConfig;
use super::events::{EventBus, PROCESS_READY, PROCESS_STOPPED};
use super::launcher::{LaunchError, LaunchParams, NodeLauncher};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Bounds on every wait the supervisor performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTimeouts {
    /// Wait for the ready signal
    pub start: Duration,
    /// Wait for the stopped signal after a graceful terminate
    pub stop: Duration,
    /// Liveness poll interval after the stop timeout
    pub poll_interval: Duration,
    /// How long to keep polling before giving up
    pub grace: Duration,
}

impl Default for SupervisorTimeouts {
    fn default() -> Self {
        Self::from(&NodeConfig::default())
    }
}

impl From<&NodeConfig> for SupervisorTimeouts {
    fn from(config: &NodeConfig) -> Self {
        Self {
            start: config.start_timeout(),
            stop: config.stop_timeout(),
            poll_interval: config.stop_poll_interval(),
            grace: config.stop_grace(),
        }
    }
}

/// How a start attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The node announced it is listening
    Signalled,
    /// No ready signal within the start timeout; the process is still alive
    TimedOut,
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("A node is already running for account '{account}'")]
    AlreadyRunning { account: String },

    #[error("Node exited during startup: {status}")]
    ExitedDuringStartup { status: String },

    #[error("Node did not stop within {timeout:?}")]
    StopTimeout { timeout: Duration },

    #[error("Start cancelled")]
    Cancelled,

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// The live process handle
#[derive(Debug)]
struct RunningNode {
    params: LaunchParams,
    pid: u32,
    started_at: Instant,
}

/// Owns the node process handle
pub struct ProcessSupervisor {
    launcher: Box<dyn NodeLauncher>,
    events: EventBus,
    timeouts: SupervisorTimeouts,
    running: Option<RunningNode>,
}

impl ProcessSupervisor {
    pub fn new(launcher: Box<dyn NodeLauncher>, events: EventBus, timeouts: SupervisorTimeouts) -> Self {
        Self {
            launcher,
            events,
            timeouts,
            running: None,
        }
    }

    pub fn timeouts(&self) -> SupervisorTimeouts {
        self.timeouts
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Spawn the node and wait for its ready signal.
    ///
    /// Cancelling collapses into an immediate stop of the spawned process.
    pub async fn start(
        &mut self,
        params: &LaunchParams,
        cancel: &CancellationToken,
    ) -> Result<Readiness, SupervisorError> {
        if let Some(account) = self.running_account().map(str::to_string) {
            if self.launcher.is_alive() {
                return Err(SupervisorError::AlreadyRunning { account });
            }
            self.running = None;
        }

        // Subscribe before spawning so a fast signal cannot be missed
        let watcher = self.events.watch(&[PROCESS_READY, PROCESS_STOPPED]);
        let pid = self.launcher.spawn(params)?;
        self.running = Some(RunningNode {
            params: params.clone(),
            pid,
            started_at: Instant::now(),
        });

        let outcome = tokio::select! {
            result = watcher.wait(self.timeouts.start) => Some(result),
            _ = cancel.cancelled() => None,
        };

        match outcome {
            None => {
                log::info!("Start of node for '{}' cancelled, stopping it", params.account_name);
                self.stop(&CancellationToken::new()).await?;
                Err(SupervisorError::Cancelled)
            }
            Some(Ok(event)) if event.name == PROCESS_STOPPED => {
                log::error!("Node for '{}' exited during startup: {}", params.account_name, event.payload);
                self.running = None;
                Err(SupervisorError::ExitedDuringStartup {
                    status: event.payload,
                })
            }
            Some(Ok(event)) => {
                log::info!("Node for '{}' is ready: {}", params.account_name, event.payload);
                Ok(Readiness::Signalled)
            }
            Some(Err(timed_out)) => {
                log::warn!("{}", timed_out);
                Ok(Readiness::TimedOut)
            }
        }
    }

    /// Stop the running node and confirm it exited.
    ///
    /// Idempotent when nothing runs. On timeout or cancellation the process is
    /// force-killed and polled until it is gone or the grace period ends.
    pub async fn stop(&mut self, cancel: &CancellationToken) -> Result<(), SupervisorError> {
        let Some((account, pid)) = self
            .running
            .as_ref()
            .map(|r| (r.params.account_name.clone(), r.pid))
        else {
            return Ok(());
        };

        // Subscribe first: the node may already be on its way out
        let stopped = self.events.watch(&[PROCESS_STOPPED]);
        if !self.launcher.is_alive() {
            self.running = None;
            return Ok(());
        }

        log::info!("Stopping node for '{}' (PID {})", account, pid);

        if let Err(e) = self.launcher.terminate() {
            log::warn!("Graceful stop of node for '{}' failed: {}", account, e);
        }

        let graceful = tokio::select! {
            result = stopped.wait(self.timeouts.stop) => match result {
                Ok(event) => {
                    log::info!("Node for '{}' stopped: {}", account, event.payload);
                    true
                }
                Err(timed_out) => {
                    log::warn!("{}", timed_out);
                    false
                }
            },
            _ = cancel.cancelled() => {
                log::warn!("Stop of node for '{}' cancelled, forcing exit", account);
                false
            }
        };

        if graceful {
            self.running = None;
            return Ok(());
        }
        self.kill_and_wait().await
    }

    /// Force-kill the running node and wait for it to disappear
    pub async fn force_stop(&mut self) -> Result<(), SupervisorError> {
        if self.running.is_none() && !self.launcher.is_alive() {
            return Ok(());
        }
        self.kill_and_wait().await
    }

    async fn kill_and_wait(&mut self) -> Result<(), SupervisorError> {
        if let Err(e) = self.launcher.kill() {
            log::debug!("Kill request not delivered: {}", e);
        }

        let deadline = Instant::now() + self.timeouts.grace;
        loop {
            if !self.launcher.is_alive() {
                self.running = None;
                return Ok(());
            }
            if Instant::now() >= deadline {
                log::error!("Node is still alive {:?} after kill", self.timeouts.grace);
                return Err(SupervisorError::StopTimeout {
                    timeout: self.timeouts.stop + self.timeouts.grace,
                });
            }
            tokio::time::sleep(self.timeouts.poll_interval).await;
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.running.is_some() && self.launcher.is_alive()
    }

    /// Account whose node process we hold
    pub fn running_account(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.params.account_name.as_str())
    }

    pub fn is_running_for(&mut self, account: &str) -> bool {
        self.running_account() == Some(account) && self.launcher.is_alive()
    }

    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().map(|r| r.pid)
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.running.as_ref().map(|r| r.started_at.elapsed())
    }

    pub fn logs(&self) -> Vec<String> {
        self.launcher.logs()
    }

    pub fn save_logs(&self, path: &Path) -> Result<(), LaunchError> {
        self.launcher.save_logs(path)
    }
}
