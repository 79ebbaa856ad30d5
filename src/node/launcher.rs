//! Node process control
//!
//! Spawns the `rgb-lightning-node` executable for one account, captures its
//! output, and reports readiness and exit on the [`EventBus`]. The launcher
//! owns the child handle; only the supervisor drives it.

use super::config::{NodeConfig, NODE_BINARY_NAME};
use super::events::{EventBus, PROCESS_LOG, PROCESS_READY, PROCESS_STOPPED};
use crate::account::Network;
use std::collections::VecDeque;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Log target for captured node output (routed to its own file)
pub const NODE_LOG_TARGET: &str = "rgb_node";

/// Everything needed to launch the node for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchParams {
    pub account_name: String,
    pub network: Network,
    pub data_dir: PathBuf,
    pub daemon_listening_port: u16,
    pub ldk_peer_listening_port: u16,
}

impl LaunchParams {
    /// Command line arguments passed to the node
    pub fn args(&self) -> Vec<String> {
        vec![
            self.data_dir.to_string_lossy().into_owned(),
            "--daemon-listening-port".to_string(),
            self.daemon_listening_port.to_string(),
            "--ldk-peer-listening-port".to_string(),
            self.ldk_peer_listening_port.to_string(),
            "--network".to_string(),
            self.network.as_str().to_string(),
        ]
    }
}

/// Errors from spawning or signalling the node process
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("rgb-lightning-node not found at {}", .path.display())]
    BinaryNotFound { path: PathBuf },

    #[error("Port {port} is already in use{}", .pid.map(|p| format!(" (rgb-lightning-node PID {})", p)).unwrap_or_default())]
    PortInUse { port: u16, pid: Option<u32> },

    #[error("Failed to create data directory {}: {source}", .path.display())]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start rgb-lightning-node: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to signal rgb-lightning-node: {0}")]
    Signal(#[source] std::io::Error),

    #[error("Failed to write node logs to {}: {source}", .path.display())]
    SaveLogs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No node process is running")]
    NotRunning,
}

/// Process control consumed by the supervisor
pub trait NodeLauncher: Send + Sync {
    /// Spawn the node; returns its PID. Readiness is reported on the event bus.
    fn spawn(&mut self, params: &LaunchParams) -> Result<u32, LaunchError>;

    /// Ask the process to shut down gracefully
    fn terminate(&mut self) -> Result<(), LaunchError>;

    /// Force the process to exit
    fn kill(&mut self) -> Result<(), LaunchError>;

    fn is_alive(&mut self) -> bool;

    /// Captured output of the current (or last) process
    fn logs(&self) -> Vec<String> {
        Vec::new()
    }

    fn save_logs(&self, path: &Path) -> Result<(), LaunchError> {
        let mut contents = self.logs().join("\n");
        contents.push('\n');
        std::fs::write(path, contents).map_err(|source| LaunchError::SaveLogs {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Bounded ring buffer of output lines
#[derive(Debug)]
struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn snapshot(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }

    fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Handle on a spawned process
#[derive(Debug)]
struct ChildHandle {
    pid: u32,
    alive: Arc<AtomicBool>,
    kill: CancellationToken,
}

/// Launches the node binary as a child process of the wallet
pub struct LocalNodeLauncher {
    binary: PathBuf,
    ready_marker: String,
    events: EventBus,
    output: Arc<LogBuffer>,
    child: Option<ChildHandle>,
}

impl LocalNodeLauncher {
    pub fn new(config: &NodeConfig, events: EventBus) -> Self {
        Self {
            binary: config.node_binary_path(),
            ready_marker: config.ready_marker.clone(),
            events,
            output: Arc::new(LogBuffer::new(config.log_buffer_lines)),
            child: None,
        }
    }

    /// Find the PID of any running rgb-lightning-node process
    pub fn find_node_pid() -> Option<u32> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());

        for (pid, process) in sys.processes() {
            let name = process.name().to_string_lossy().to_lowercase();
            if name == NODE_BINARY_NAME.to_lowercase() {
                return Some(pid.as_u32());
            }
        }
        None
    }

    fn check_port(port: u16) -> Result<(), LaunchError> {
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(_) => Ok(()),
            Err(_) => Err(LaunchError::PortInUse {
                port,
                pid: Self::find_node_pid(),
            }),
        }
    }

    fn child(&self) -> Result<&ChildHandle, LaunchError> {
        self.child
            .as_ref()
            .filter(|c| c.alive.load(Ordering::SeqCst))
            .ok_or(LaunchError::NotRunning)
    }
}

impl NodeLauncher for LocalNodeLauncher {
    fn spawn(&mut self, params: &LaunchParams) -> Result<u32, LaunchError> {
        if !self.binary.exists() {
            return Err(LaunchError::BinaryNotFound {
                path: self.binary.clone(),
            });
        }

        Self::check_port(params.daemon_listening_port)?;
        Self::check_port(params.ldk_peer_listening_port)?;

        std::fs::create_dir_all(&params.data_dir).map_err(|source| LaunchError::DataDir {
            path: params.data_dir.clone(),
            source,
        })?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(params.args());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        // On Windows, prevent console window from appearing
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        log::info!(
            "Starting rgb-lightning-node for '{}': {} {}",
            params.account_name,
            self.binary.display(),
            params.args().join(" ")
        );
        let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;
        let pid = child.id().ok_or(LaunchError::NotRunning)?;
        log::info!("rgb-lightning-node started with PID {}", pid);

        self.output.clear();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, self.output.clone(), self.events.clone(), self.ready_marker.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, self.output.clone(), self.events.clone(), self.ready_marker.clone());
        }

        let alive = Arc::new(AtomicBool::new(true));
        let kill = CancellationToken::new();
        {
            let alive = alive.clone();
            let kill = kill.clone();
            let events = self.events.clone();
            tokio::spawn(async move {
                let exited = tokio::select! {
                    status = child.wait() => Some(status),
                    _ = kill.cancelled() => None,
                };
                let status = match exited {
                    Some(status) => status,
                    None => {
                        if let Err(e) = child.start_kill() {
                            log::warn!("Failed to kill rgb-lightning-node: {}", e);
                        }
                        child.wait().await
                    }
                };

                alive.store(false, Ordering::SeqCst);
                let payload = match status {
                    Ok(status) => status.to_string(),
                    Err(e) => format!("unknown ({})", e),
                };
                log::info!("rgb-lightning-node (PID {}) exited: {}", pid, payload);
                events.emit(PROCESS_STOPPED, payload);
            });
        }

        self.child = Some(ChildHandle { pid, alive, kill });
        Ok(pid)
    }

    fn terminate(&mut self) -> Result<(), LaunchError> {
        let child = self.child()?;

        #[cfg(unix)]
        {
            let pid = libc::pid_t::try_from(child.pid).map_err(|_| {
                LaunchError::Signal(std::io::Error::other(format!("invalid PID {}", child.pid)))
            })?;
            log::info!("Sending SIGTERM to rgb-lightning-node (PID {})", pid);
            // SAFETY: kill(2) has no memory-safety preconditions
            let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
            if rc != 0 {
                return Err(LaunchError::Signal(std::io::Error::last_os_error()));
            }
        }

        #[cfg(not(unix))]
        {
            log::info!("Stopping rgb-lightning-node (PID {})", child.pid);
            child.kill.cancel();
        }

        Ok(())
    }

    fn kill(&mut self) -> Result<(), LaunchError> {
        let child = self.child()?;
        log::warn!("Force-killing rgb-lightning-node (PID {})", child.pid);
        child.kill.cancel();
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.child
            .as_ref()
            .is_some_and(|c| c.alive.load(Ordering::SeqCst))
    }

    fn logs(&self) -> Vec<String> {
        self.output.snapshot()
    }
}

/// Forward each output line to the buffer, the node log and the event bus
fn spawn_reader<R>(reader: R, output: Arc<LogBuffer>, events: EventBus, ready_marker: String)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    log::info!(target: NODE_LOG_TARGET, "{}", line);
                    if !ready_marker.is_empty() && line.contains(&ready_marker) {
                        events.emit(PROCESS_READY, line.clone());
                    }
                    events.emit(PROCESS_LOG, line.clone());
                    output.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!("Stopped reading node output: {}", e);
                    break;
                }
            }
        }
    });
}
