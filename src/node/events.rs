//! Node lifecycle events
//!
//! The node announces readiness and termination out-of-band, so callers
//! cannot learn them from a synchronous return value. Lifecycle signals are
//! published on an [`EventBus`] and awaited through an [`EventWatcher`] that
//! is raced against a timeout.
//!
//! A watcher subscribes when it is created, not when it is awaited. Create it
//! *before* triggering the action whose outcome it observes, otherwise a fast
//! signal can be missed.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Emitted once the node logs its ready marker
pub const PROCESS_READY: &str = "process-ready";

/// Emitted when the node process has exited
pub const PROCESS_STOPPED: &str = "process-stopped";

/// Emitted for every captured line of node output
pub const PROCESS_LOG: &str = "process-log";

const DEFAULT_CAPACITY: usize = 256;

/// A named signal with an opaque payload (log line or exit status)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub name: String,
    pub payload: String,
}

/// Returned when no matching event arrived in time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Timed out after {timeout:?} waiting for {names:?}")]
pub struct TimedOut {
    pub names: Vec<String>,
    pub timeout: Duration,
}

/// In-process event channel shared by the launcher and the supervisor
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<NodeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current watcher
    pub fn emit(&self, name: &str, payload: impl Into<String>) {
        let event = NodeEvent {
            name: name.to_string(),
            payload: payload.into(),
        };
        // No subscribers is not an error: nobody is waiting for this signal
        let _ = self.sender.send(event);
    }

    /// Subscribe now to any of `names`
    pub fn watch(&self, names: &[&str]) -> EventWatcher {
        EventWatcher {
            names: names.iter().map(|n| n.to_string()).collect(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to `name` and wait for it, giving up after `timeout`
    pub async fn await_event(&self, name: &str, timeout: Duration) -> Result<String, TimedOut> {
        self.watch(&[name]).wait(timeout).await.map(|e| e.payload)
    }

    /// Number of live subscriptions
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A single pending subscription; unsubscribes when dropped
#[derive(Debug)]
pub struct EventWatcher {
    names: Vec<String>,
    receiver: broadcast::Receiver<NodeEvent>,
}

impl EventWatcher {
    /// Wait for the first matching event.
    ///
    /// Consumes the watcher, so the subscription ends on success, on timeout,
    /// and when the returned future is dropped before completion.
    pub async fn wait(mut self, timeout: Duration) -> Result<NodeEvent, TimedOut> {
        let result = tokio::time::timeout(timeout, self.next_event()).await;
        result.map_err(|_| TimedOut {
            names: self.names.clone(),
            timeout,
        })
    }

    /// Wait for the next matching event with no time limit
    pub async fn next_event(&mut self) -> NodeEvent {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.names.iter().any(|n| *n == event.name) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Event watcher for {:?} lagged, {} event(s) skipped",
                        self.names,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Nothing can arrive anymore; let the timeout decide
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}
