//! Shared fakes for the integration tests
//!
//! `MockLauncher` stands in for the node process: it reports readiness and
//! exit on the event bus the way the real launcher does. `MockControlApi`
//! models the node's lock/unlock rules and can be scripted to fail.

#![allow(dead_code)]

use async_trait::async_trait;
use kaleido_wallet_lib::node::events::{PROCESS_READY, PROCESS_STOPPED};
use kaleido_wallet_lib::node::{
    ApiError, ControlApi, LaunchError, LaunchParams, NodeInfo, NodeLauncher, ProcessSupervisor,
    SupervisorTimeouts, UnlockRequest,
};
use kaleido_wallet_lib::{
    Account, AccountRegistry, EventBus, FileAccountRegistry, Network, SessionOrchestrator,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use zeroize::Zeroizing;

pub const GOOD_PASSWORD: &str = "correct horse battery staple";
pub const BAD_PASSWORD: &str = "hunter2";

/// Observable state of the fake node process
pub struct LauncherState {
    /// Delay before the ready signal; `None` never signals
    pub ready_after: Mutex<Option<Duration>>,
    pub honours_terminate: AtomicBool,
    pub honours_kill: AtomicBool,
    /// Make the next spawn fail
    pub fail_spawn: AtomicBool,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub spawned: Mutex<Vec<String>>,
    alive: AtomicBool,
    generation: AtomicUsize,
}

impl LauncherState {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn set_ready_after(&self, delay: Option<Duration>) {
        *self.ready_after.lock().unwrap() = delay;
    }

    /// The process dies on its own
    pub fn crash(&self, events: &EventBus) {
        self.exit(events, "exit status: 101");
    }

    fn exit(&self, events: &EventBus, status: &str) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            events.emit(PROCESS_STOPPED, status);
        }
    }
}

pub struct MockLauncher {
    events: EventBus,
    state: Arc<LauncherState>,
}

impl MockLauncher {
    pub fn new(events: EventBus) -> (Self, Arc<LauncherState>) {
        let state = Arc::new(LauncherState {
            ready_after: Mutex::new(Some(Duration::from_secs(2))),
            honours_terminate: AtomicBool::new(true),
            honours_kill: AtomicBool::new(true),
            fail_spawn: AtomicBool::new(false),
            live: AtomicUsize::new(0),
            max_live: AtomicUsize::new(0),
            spawned: Mutex::new(Vec::new()),
            alive: AtomicBool::new(false),
            generation: AtomicUsize::new(0),
        });
        (
            Self {
                events,
                state: state.clone(),
            },
            state,
        )
    }
}

impl NodeLauncher for MockLauncher {
    fn spawn(&mut self, params: &LaunchParams) -> Result<u32, LaunchError> {
        if self.state.fail_spawn.swap(false, Ordering::SeqCst) {
            return Err(LaunchError::BinaryNotFound {
                path: PathBuf::from("/missing/rgb-lightning-node"),
            });
        }

        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_live.fetch_max(live, Ordering::SeqCst);
        self.state.alive.store(true, Ordering::SeqCst);
        self.state.spawned.lock().unwrap().push(params.account_name.clone());
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = *self.state.ready_after.lock().unwrap() {
            let events = self.events.clone();
            let state = self.state.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if state.generation.load(Ordering::SeqCst) == generation
                    && state.alive.load(Ordering::SeqCst)
                {
                    events.emit(PROCESS_READY, "Listening on 0.0.0.0:3001");
                }
            });
        }

        Ok(1000 + generation as u32)
    }

    fn terminate(&mut self) -> Result<(), LaunchError> {
        if self.state.honours_terminate.load(Ordering::SeqCst) {
            let events = self.events.clone();
            let state = self.state.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                state.exit(&events, "exit status: 0");
            });
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<(), LaunchError> {
        if self.state.honours_kill.load(Ordering::SeqCst) {
            self.state.exit(&self.events, "signal: 9 (SIGKILL)");
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    fn logs(&self) -> Vec<String> {
        vec!["Listening on 0.0.0.0:3001".to_string()]
    }
}

/// Observable state of the fake control API
pub struct ApiState {
    pub password: String,
    pub initialized: AtomicBool,
    pub unlocked: AtomicBool,
    pub reachable: AtomicBool,
    pub calls: Mutex<Vec<&'static str>>,
    pub next_lock_error: Mutex<Option<ApiError>>,
    pub next_unlock_error: Mutex<Option<ApiError>>,
    pub next_backup_error: Mutex<Option<ApiError>>,
    /// Leave a partial file behind when a scripted backup error fires
    pub partial_backup: AtomicBool,
}

impl ApiState {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    pub fn fail_next_lock(&self, err: ApiError) {
        *self.next_lock_error.lock().unwrap() = Some(err);
    }

    pub fn fail_next_unlock(&self, err: ApiError) {
        *self.next_unlock_error.lock().unwrap() = Some(err);
    }

    pub fn fail_next_backup(&self, err: ApiError) {
        *self.next_backup_error.lock().unwrap() = Some(err);
    }

    fn record(&self, call: &'static str) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(call);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::Transport("connection refused".into()))
        }
    }
}

pub struct MockControlApi {
    endpoint: Url,
    state: Arc<ApiState>,
}

impl MockControlApi {
    pub fn new() -> (Self, Arc<ApiState>) {
        let state = Arc::new(ApiState {
            password: GOOD_PASSWORD.to_string(),
            initialized: AtomicBool::new(true),
            unlocked: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            next_lock_error: Mutex::new(None),
            next_unlock_error: Mutex::new(None),
            next_backup_error: Mutex::new(None),
            partial_backup: AtomicBool::new(false),
        });
        let endpoint = Url::parse("http://127.0.0.1:3001/").unwrap();
        (
            Self {
                endpoint,
                state: state.clone(),
            },
            state,
        )
    }
}

#[async_trait]
impl ControlApi for MockControlApi {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn set_endpoint(&mut self, url: Url) {
        self.endpoint = url;
    }

    async fn init(&self, password: &str) -> Result<Zeroizing<String>, ApiError> {
        self.state.record("init")?;
        if self.state.initialized.swap(true, Ordering::SeqCst) {
            return Err(ApiError::Precondition("Node has already been initialized".into()));
        }
        assert!(!password.is_empty());
        Ok(Zeroizing::new("abandon ability able about above absent".to_string()))
    }

    async fn unlock(&self, request: &UnlockRequest) -> Result<(), ApiError> {
        self.state.record("unlock")?;
        if let Some(err) = self.state.next_unlock_error.lock().unwrap().take() {
            return Err(err);
        }
        if !self.state.initialized.load(Ordering::SeqCst) {
            return Err(ApiError::NotInitialized);
        }
        if self.state.unlocked.load(Ordering::SeqCst) {
            return Err(ApiError::Precondition("Node has already been unlocked".into()));
        }
        if request.password != self.state.password {
            return Err(ApiError::WrongPassword);
        }
        self.state.unlocked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn lock(&self) -> Result<(), ApiError> {
        self.state.record("lock")?;
        if let Some(err) = self.state.next_lock_error.lock().unwrap().take() {
            return Err(err);
        }
        if !self.state.unlocked.swap(false, Ordering::SeqCst) {
            return Err(ApiError::Precondition("Node has already been locked".into()));
        }
        Ok(())
    }

    async fn backup(&self, path: &Path, password: &str) -> Result<(), ApiError> {
        self.state.record("backup")?;
        if let Some(err) = self.state.next_backup_error.lock().unwrap().take() {
            if self.state.partial_backup.load(Ordering::SeqCst) {
                std::fs::write(path, b"partial").unwrap();
            }
            return Err(err);
        }
        if self.state.unlocked.load(Ordering::SeqCst) {
            return Err(ApiError::Precondition("Node has not been locked".into()));
        }
        if password != self.state.password {
            return Err(ApiError::WrongPassword);
        }
        std::fs::write(path, b"encrypted backup").unwrap();
        Ok(())
    }

    async fn restore(&self, _path: &Path, _password: &str) -> Result<(), ApiError> {
        self.state.record("restore")?;
        self.state.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> Result<NodeInfo, ApiError> {
        self.state.record("status")?;
        if !self.state.unlocked.load(Ordering::SeqCst) {
            return Err(ApiError::Precondition("Node is locked (hint: call unlock)".into()));
        }
        Ok(NodeInfo {
            pubkey: "02abc".into(),
            num_peers: 1,
            ..NodeInfo::default()
        })
    }

    async fn shutdown(&self) -> Result<(), ApiError> {
        self.state.record("shutdown")?;
        Ok(())
    }
}

/// An orchestrator wired to the fakes
pub struct Harness {
    pub session: Arc<SessionOrchestrator>,
    pub launcher: Arc<LauncherState>,
    pub api: Arc<ApiState>,
    pub events: EventBus,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let events = EventBus::default();
        let (launcher, launcher_state) = MockLauncher::new(events.clone());
        let (api, api_state) = MockControlApi::new();

        let supervisor = ProcessSupervisor::new(
            Box::new(launcher),
            events.clone(),
            SupervisorTimeouts::default(),
        );
        let session = SessionOrchestrator::new(supervisor, Box::new(api), dir.path().join("data"));

        Self {
            session: Arc::new(session),
            launcher: launcher_state,
            api: api_state,
            events,
            dir,
        }
    }

    /// Fresh path inside the test directory
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// File-backed registry holding `alice`, `bob` (local) and `remote`
    pub fn registry(&self) -> Arc<FileAccountRegistry> {
        let registry = FileAccountRegistry::open(self.path("accounts.json")).unwrap();
        registry.insert(alice()).unwrap();
        registry.insert(bob()).unwrap();
        registry.insert(remote()).unwrap();
        Arc::new(registry)
    }
}

pub fn alice() -> Account {
    Account::local("alice", Network::Regtest)
}

pub fn bob() -> Account {
    Account::local("bob", Network::Regtest)
}

pub fn remote() -> Account {
    Account::remote("remote", Network::Signet, "http://node.example.com:3001")
}
