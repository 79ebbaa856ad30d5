//! Node management module for KaleidoSwap Wallet
//!
//! This module runs an RGB Lightning node for the current account and keeps
//! its wallet session in a known state.
//!
//! ## Features
//!
//! - **Local Mode**: Spawn and supervise `rgb-lightning-node` per account
//! - **Remote Mode**: Drive a node managed elsewhere through its control API
//! - **Readiness Detection**: Ready/stopped signals raced against timeouts
//! - **Session State Machine**: Locked/unlocked phases with a sticky fault
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    node module                           │
//! ├─────────────────────────────────────────────────────────┤
//! │  config.rs     - Configuration types and persistence     │
//! │  events.rs     - Lifecycle event bus and watchers        │
//! │  launcher.rs   - Process spawn, output capture, signals  │
//! │  manager.rs    - Process supervision (start/stop)        │
//! │  rpc.rs        - Control API client                      │
//! │  state.rs      - Session phases and snapshots            │
//! │  session.rs    - Session orchestrator                    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod events;
pub mod launcher;
pub mod manager;
pub mod rpc;
pub mod session;
pub mod state;

// Re-export key types for convenience
pub use config::NodeConfig;
pub use events::{EventBus, EventWatcher, NodeEvent, TimedOut};
pub use launcher::{LaunchError, LaunchParams, LocalNodeLauncher, NodeLauncher};
pub use manager::{ProcessSupervisor, Readiness, SupervisorError, SupervisorTimeouts};
pub use rpc::{ApiError, ControlApi, NodeApiClient, NodeInfo, UnlockRequest};
pub use session::{Session, SessionOrchestrator};
pub use state::{LockState, Phase, SessionMode, SessionSnapshot};
