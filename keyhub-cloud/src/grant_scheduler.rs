//! Periodic access-grant runner.
//!
//! Event loop that re-runs [`AccessGrantService::grant_access`] for a set of
//! vaults on a fixed interval and on demand. Runs for the same vault never
//! overlap: a run requested while one is in flight is skipped.

use crate::access_grant::{AccessGrantService, GrantOutcome};
use crate::config::HubConfig;
use crate::error::{CloudError, CloudResult};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One grant pass for one vault.
#[async_trait]
pub trait GrantRunner: Send + Sync {
    async fn grant_access(&self, vault_id: &str) -> CloudResult<GrantOutcome>;
}

#[async_trait]
impl GrantRunner for AccessGrantService {
    async fn grant_access(&self, vault_id: &str) -> CloudResult<GrantOutcome> {
        AccessGrantService::grant_access(self, vault_id).await
    }
}

type InFlightSet = Arc<Mutex<HashSet<String>>>;

fn lock(set: &InFlightSet) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a vault as in flight; the mark is released on drop, so a run that
/// panics or is cancelled does not block later runs.
struct InFlight {
    set: InFlightSet,
    vault_id: String,
}

impl InFlight {
    fn acquire(set: &InFlightSet, vault_id: &str) -> Option<Self> {
        lock(set).insert(vault_id.to_string()).then(|| Self {
            set: set.clone(),
            vault_id: vault_id.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.vault_id);
    }
}

/// Per-vault re-entrancy guard.
#[derive(Clone, Default)]
pub struct GrantGuard {
    in_flight: InFlightSet,
}

impl GrantGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `runner` for `vault_id` unless a run for that vault is already in
    /// flight, in which case returns `None` without running.
    pub async fn run(
        &self,
        runner: &dyn GrantRunner,
        vault_id: &str,
    ) -> Option<CloudResult<GrantOutcome>> {
        let Some(slot) = InFlight::acquire(&self.in_flight, vault_id) else {
            debug!("grant run for vault {vault_id} already in progress, skipping");
            return None;
        };

        let result = runner.grant_access(vault_id).await;
        drop(slot);

        match &result {
            Ok(outcome) if outcome.uploaded() => {
                info!("vault {vault_id}: granted {} users", outcome.granted.len())
            }
            Ok(_) => debug!("vault {vault_id}: nothing to grant"),
            Err(e) => warn!("access grant for vault {vault_id} failed: {e}"),
        }
        Some(result)
    }

    pub async fn is_running(&self, vault_id: &str) -> bool {
        lock(&self.in_flight).contains(vault_id)
    }
}

/// Commands accepted by the scheduler loop.
#[derive(Debug)]
pub enum GrantCommand {
    RunNow,
    AddVault(String),
    RemoveVault(String),
    Stop,
}

/// Handle for sending commands to the scheduler.
#[derive(Clone)]
pub struct AccessGrantHandle {
    command_tx: mpsc::Sender<GrantCommand>,
}

impl AccessGrantHandle {
    async fn send(&self, command: GrantCommand) -> CloudResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| CloudError::Config("access grant scheduler not running".to_string()))
    }

    /// Runs all vaults immediately.
    pub async fn run_now(&self) -> CloudResult<()> {
        self.send(GrantCommand::RunNow).await
    }

    /// Adds a vault and runs it immediately.
    pub async fn add_vault(&self, vault_id: impl Into<String>) -> CloudResult<()> {
        self.send(GrantCommand::AddVault(vault_id.into())).await
    }

    pub async fn remove_vault(&self, vault_id: impl Into<String>) -> CloudResult<()> {
        self.send(GrantCommand::RemoveVault(vault_id.into())).await
    }

    pub async fn stop(&self) -> CloudResult<()> {
        self.send(GrantCommand::Stop).await
    }
}

/// Scheduler loop; drive it with [`AccessGrantScheduler::run`].
pub struct AccessGrantScheduler {
    runner: Arc<dyn GrantRunner>,
    guard: GrantGuard,
    vaults: BTreeSet<String>,
    interval: Duration,
    command_rx: mpsc::Receiver<GrantCommand>,
}

/// Creates a scheduler and its command handle.
pub fn create_access_grant_scheduler(
    runner: Arc<dyn GrantRunner>,
    vaults: impl IntoIterator<Item = String>,
    interval: Duration,
) -> (AccessGrantHandle, AccessGrantScheduler) {
    let (command_tx, command_rx) = mpsc::channel(32);

    let scheduler = AccessGrantScheduler {
        runner,
        guard: GrantGuard::new(),
        vaults: vaults.into_iter().collect(),
        interval,
        command_rx,
    };

    (AccessGrantHandle { command_tx }, scheduler)
}

/// Like [`create_access_grant_scheduler`], running every
/// `config.grant_interval_secs`.
pub fn create_access_grant_scheduler_from_config(
    runner: Arc<dyn GrantRunner>,
    vaults: impl IntoIterator<Item = String>,
    config: &HubConfig,
) -> (AccessGrantHandle, AccessGrantScheduler) {
    create_access_grant_scheduler(runner, vaults, config.grant_interval())
}

impl AccessGrantScheduler {
    pub fn guard(&self) -> &GrantGuard {
        &self.guard
    }

    /// Runs until stopped or until every handle is dropped. The first pass
    /// starts immediately.
    pub async fn run(&mut self) {
        info!(
            "access grant scheduler started for {} vaults every {:?}",
            self.vaults.len(),
            self.interval
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.dispatch_all(),
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(GrantCommand::RunNow) => self.dispatch_all(),
                        Some(GrantCommand::AddVault(vault_id)) => {
                            if self.vaults.insert(vault_id.clone()) {
                                self.dispatch(vault_id);
                            }
                        }
                        Some(GrantCommand::RemoveVault(vault_id)) => {
                            self.vaults.remove(&vault_id);
                        }
                        Some(GrantCommand::Stop) => {
                            info!("access grant scheduler stopping");
                            break;
                        }
                        None => {
                            info!("command channel closed, stopping access grant scheduler");
                            break;
                        }
                    }
                }
            }
        }

        info!("access grant scheduler stopped");
    }

    fn dispatch_all(&self) {
        for vault_id in &self.vaults {
            self.dispatch(vault_id.clone());
        }
    }

    fn dispatch(&self, vault_id: String) {
        let runner = self.runner.clone();
        let guard = self.guard.clone();
        tokio::spawn(async move {
            guard.run(runner.as_ref(), &vault_id).await;
        });
    }
}
