//! Session state
//!
//! Phases of the node session state machine and the snapshot sent to the
//! frontend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the node's wallet is usable
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Locked,
    Unlocked,
}

/// Phase of the node session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Phase {
    /// No node process and no remote endpoint
    #[default]
    Stopped,

    /// Process launched, waiting for the ready signal
    Starting,

    /// Control API reachable
    Ready { lock: LockState },

    /// Stop requested, waiting for the process to exit
    Stopping,

    /// Unrecoverable error; only `reset()` leaves this phase
    Faulted { reason: String },
}

impl Phase {
    pub fn is_ready(&self) -> bool {
        matches!(self, Phase::Ready { .. })
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Phase::Faulted { .. })
    }

    /// Lock state when ready
    pub fn lock_state(&self) -> Option<LockState> {
        match self {
            Phase::Ready { lock } => Some(*lock),
            _ => None,
        }
    }

    pub const fn locked() -> Self {
        Phase::Ready {
            lock: LockState::Locked,
        }
    }

    pub const fn unlocked() -> Self {
        Phase::Ready {
            lock: LockState::Unlocked,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Stopped => f.write_str("stopped"),
            Phase::Starting => f.write_str("starting"),
            Phase::Ready {
                lock: LockState::Locked,
            } => f.write_str("ready (locked)"),
            Phase::Ready {
                lock: LockState::Unlocked,
            } => f.write_str("ready (unlocked)"),
            Phase::Stopping => f.write_str("stopping"),
            Phase::Faulted { reason } => write!(f, "faulted: {}", reason),
        }
    }
}

/// How the session reaches the node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Node process spawned and supervised by the wallet
    Local,
    /// Node managed elsewhere, reached at the account's node URL
    Remote,
}

/// Current session status (sent to frontend)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: Phase,

    /// Account the session belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SessionMode>,

    /// Process ID of the local node (if running)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Uptime in seconds (if running)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Stopped.to_string(), "stopped");
        assert_eq!(Phase::locked().to_string(), "ready (locked)");
        assert_eq!(
            Phase::Faulted {
                reason: "boom".into()
            }
            .to_string(),
            "faulted: boom"
        );
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_value(Phase::unlocked()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ready", "lock": "unlocked"}));

        let snapshot = SessionSnapshot {
            phase: Phase::Starting,
            account: Some("alice".into()),
            mode: Some(SessionMode::Local),
            pid: Some(42),
            uptime: None,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["phase"]["type"], "starting");
        assert_eq!(json["mode"], "local");
        assert!(json.get("uptime").is_none());
    }

    #[test]
    fn test_lock_state_accessor() {
        assert_eq!(Phase::locked().lock_state(), Some(LockState::Locked));
        assert_eq!(Phase::Stopping.lock_state(), None);
        assert!(Phase::unlocked().is_ready());
        assert!(!Phase::Starting.is_ready());
    }
}
