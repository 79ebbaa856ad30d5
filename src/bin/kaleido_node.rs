//! KaleidoSwap headless node launcher
//!
//! Brings up the node for an account without the desktop UI:
//!
//! ```text
//! kaleido-node [account]
//! ```
//!
//! With no argument the registry's current account is resumed. Ctrl-C
//! cancels a pending start and then locks and stops the node.

use anyhow::Context;
use kaleido_wallet_lib::node::LocalNodeLauncher;
use kaleido_wallet_lib::{
    logging, AccountSwitchCoordinator, EventBus, FileAccountRegistry, NodeConfig, SessionOrchestrator,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::load();
    let _log_handle = logging::init_logger(&config.log_dir())?;
    log::info!("KaleidoSwap node launcher v{}", env!("CARGO_PKG_VERSION"));

    let registry_path = FileAccountRegistry::default_path();
    let registry = FileAccountRegistry::open(&registry_path)
        .with_context(|| format!("Failed to open account registry at {}", registry_path.display()))?;

    if let Some(pid) = LocalNodeLauncher::find_node_pid() {
        log::warn!("Found a running rgb-lightning-node (PID {}) not started by this launcher", pid);
    }

    let events = EventBus::default();
    let session = Arc::new(SessionOrchestrator::from_config(&config, events)?);
    let switcher = AccountSwitchCoordinator::new(session.clone(), Arc::new(registry));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    let started = match std::env::args().nth(1) {
        Some(name) => switcher.switch_to(&name, &cancel).await.map(Some),
        None => switcher.resume(&cancel).await,
    };

    match started {
        Ok(Some(phase)) => {
            log::info!("Node session is {}", phase);
            cancel.cancelled().await;
        }
        Ok(None) => {
            log::warn!("No account selected; pass an account name or set a current account");
            return Ok(());
        }
        Err(e) => log::error!("Failed to bring up the node: {}", e),
    }

    // A fresh token: the shutdown itself must not be cancelled
    match session.logout(&CancellationToken::new()).await {
        Ok(phase) => log::info!("Node session is {}", phase),
        Err(e) => {
            log::error!("Clean shutdown failed ({}), forcing", e);
            session.reset().await?;
        }
    }

    Ok(())
}
