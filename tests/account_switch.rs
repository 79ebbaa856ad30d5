//! Account switching over a fake node and a file-backed registry

mod helpers;

use helpers::{Harness, GOOD_PASSWORD};
use kaleido_wallet_lib::node::{LockState, SessionMode};
use kaleido_wallet_lib::{
    AccountRegistry, AccountSwitchCoordinator, BackupCoordinator, BackupError, BackupRequest, Phase,
    RegistryError, SessionError, SwitchError,
};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

fn current(registry: &dyn AccountRegistry) -> Option<String> {
    registry.get_current().unwrap().map(|a| a.name)
}

#[tokio::test(start_paused = true)]
async fn test_switch_from_idle_starts_account() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());

    let phase = switcher.switch_to("alice", &CancellationToken::new()).await.unwrap();

    assert_eq!(phase, Phase::locked());
    assert_eq!(current(registry.as_ref()).as_deref(), Some("alice"));
    assert_eq!(h.launcher.spawned(), vec!["alice"]);
}

#[tokio::test(start_paused = true)]
async fn test_switch_stops_previous_node_first() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());
    let cancel = CancellationToken::new();

    switcher.switch_to("alice", &cancel).await.unwrap();
    h.session.unlock(GOOD_PASSWORD).await.unwrap();
    let phase = switcher.switch_to("bob", &cancel).await.unwrap();

    assert_eq!(phase, Phase::locked());
    assert_eq!(h.launcher.spawned(), vec!["alice", "bob"]);
    assert_eq!(h.launcher.max_live(), 1);
    assert_eq!(h.launcher.live(), 1);
    assert_eq!(current(registry.as_ref()).as_deref(), Some("bob"));
    assert_eq!(h.session.snapshot().account.as_deref(), Some("bob"));
}

#[tokio::test(start_paused = true)]
async fn test_switch_aborts_when_old_node_will_not_stop() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());
    let cancel = CancellationToken::new();

    switcher.switch_to("alice", &cancel).await.unwrap();
    h.launcher.honours_terminate.store(false, Ordering::SeqCst);
    h.launcher.honours_kill.store(false, Ordering::SeqCst);

    let err = switcher.switch_to("bob", &cancel).await.unwrap_err();

    assert!(matches!(err, SwitchError::StopTimeout { .. }));
    assert_eq!(current(registry.as_ref()).as_deref(), Some("alice"));
    assert_eq!(h.launcher.spawned(), vec!["alice"]);
    assert_eq!(h.launcher.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_keeps_new_current_account() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());
    let cancel = CancellationToken::new();

    switcher.switch_to("alice", &cancel).await.unwrap();
    h.launcher.fail_spawn.store(true, Ordering::SeqCst);

    let err = switcher.switch_to("bob", &cancel).await.unwrap_err();

    assert!(matches!(err, SwitchError::Session(SessionError::Launch(_))));
    assert_eq!(current(registry.as_ref()).as_deref(), Some("bob"));
    assert_eq!(h.launcher.live(), 0);
    assert_eq!(h.launcher.max_live(), 1);
    assert_eq!(h.session.phase(), Phase::Stopped);

    // Retry succeeds
    assert_eq!(switcher.switch_to("bob", &cancel).await.unwrap(), Phase::locked());
}

#[tokio::test(start_paused = true)]
async fn test_switch_to_active_account_only_persists() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());
    let cancel = CancellationToken::new();

    switcher.switch_to("alice", &cancel).await.unwrap();
    h.session.unlock(GOOD_PASSWORD).await.unwrap();
    registry.clear_current().unwrap();

    let phase = switcher.switch_to("alice", &cancel).await.unwrap();

    assert_eq!(phase, Phase::unlocked());
    assert_eq!(h.launcher.spawned(), vec!["alice"]);
    assert_eq!(current(registry.as_ref()).as_deref(), Some("alice"));
}

#[tokio::test(start_paused = true)]
async fn test_switch_to_remote_account_skips_process() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());
    let cancel = CancellationToken::new();

    switcher.switch_to("alice", &cancel).await.unwrap();
    let phase = switcher.switch_to("remote", &cancel).await.unwrap();

    assert_eq!(phase.lock_state(), Some(LockState::Locked));
    assert_eq!(h.launcher.live(), 0);
    assert_eq!(h.launcher.spawned(), vec!["alice"]);
    assert_eq!(h.session.snapshot().mode, Some(SessionMode::Remote));
}

#[tokio::test(start_paused = true)]
async fn test_switch_to_unknown_account() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());

    let err = switcher.switch_to("mallory", &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, SwitchError::Registry(RegistryError::AccountNotFound { .. })));
    assert_eq!(current(registry.as_ref()), None);
    assert!(h.launcher.spawned().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_backup_during_switch_is_busy() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());
    let backups = BackupCoordinator::new(h.session.clone());
    let cancel = CancellationToken::new();

    switcher.switch_to("alice", &cancel).await.unwrap();
    h.session.unlock(GOOD_PASSWORD).await.unwrap();
    let destination = h.path("b.enc");

    let (switched, backup) = tokio::join!(
        switcher.switch_to("bob", &cancel),
        backups.run_backup(BackupRequest::new(&destination, GOOD_PASSWORD)),
    );

    assert!(matches!(backup, Err(BackupError::Busy)));
    assert_eq!(switched.unwrap(), Phase::locked());
    assert_eq!(h.session.snapshot().account.as_deref(), Some("bob"));
    assert!(!destination.exists());
    assert_eq!(h.api.count("backup"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resume_current_account() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());
    let cancel = CancellationToken::new();

    assert_eq!(switcher.resume(&cancel).await.unwrap(), None);

    registry.set_current("bob").unwrap();
    assert_eq!(switcher.resume(&cancel).await.unwrap(), Some(Phase::locked()));
    assert_eq!(h.launcher.spawned(), vec!["bob"]);
}

#[tokio::test(start_paused = true)]
async fn test_remove_active_account_stops_node() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());
    let cancel = CancellationToken::new();

    switcher.switch_to("alice", &cancel).await.unwrap();
    switcher.remove_account("alice", &cancel).await.unwrap();

    assert_eq!(h.session.phase(), Phase::Stopped);
    assert_eq!(h.launcher.live(), 0);
    assert!(registry.get("alice").unwrap().is_none());
    assert_eq!(current(registry.as_ref()), None);

    // Removing an inactive account leaves the session alone
    switcher.switch_to("bob", &cancel).await.unwrap();
    switcher.remove_account("remote", &cancel).await.unwrap();
    assert_eq!(h.session.phase(), Phase::locked());
    assert_eq!(current(registry.as_ref()).as_deref(), Some("bob"));
}

#[tokio::test(start_paused = true)]
async fn test_switch_refused_while_faulted() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());
    let cancel = CancellationToken::new();

    h.launcher.set_ready_after(None);
    h.api.reachable.store(false, Ordering::SeqCst);
    let err = switcher.switch_to("alice", &cancel).await.unwrap_err();
    assert!(matches!(err, SwitchError::Session(SessionError::StartTimeout { .. })));

    let err = switcher.switch_to("bob", &cancel).await.unwrap_err();
    assert!(matches!(err, SwitchError::Faulted { .. }));

    h.session.reset().await.unwrap();
    h.launcher.set_ready_after(Some(std::time::Duration::from_secs(2)));
    assert_eq!(switcher.switch_to("bob", &cancel).await.unwrap(), Phase::locked());
    assert_eq!(h.launcher.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_new_node_is_not_left_running() {
    let h = Harness::new();
    let registry = h.registry();
    let switcher = AccountSwitchCoordinator::new(h.session.clone(), registry.clone());
    let cancel = CancellationToken::new();

    switcher.switch_to("alice", &cancel).await.unwrap();
    h.launcher.set_ready_after(None);
    h.api.reachable.store(false, Ordering::SeqCst);

    let err = switcher.switch_to("bob", &cancel).await.unwrap_err();

    assert!(matches!(err, SwitchError::Session(SessionError::StartTimeout { .. })));
    assert!(h.session.phase().is_faulted());
    assert_eq!(h.launcher.spawned(), vec!["alice", "bob"]);
    assert_eq!(h.launcher.live(), 0);
    assert_eq!(h.launcher.max_live(), 1);
    assert_eq!(h.session.snapshot().pid, None);
}
