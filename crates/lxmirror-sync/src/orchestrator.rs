//! Orchestrator - owns every running scheduler
//!
//! The only component with cross-account visibility. It maps pairing ids to
//! [`SchedulerHandle`]s and enforces that at most one scheduler runs per
//! pairing. Starting or stopping one pairing never touches another's task.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lxmirror_core::config::Config;
use lxmirror_core::domain::{Account, AccountId, DomainError, Pairing, PairingId};
use lxmirror_core::ports::{IActivitySink, ITransferEngine};
use tracing::{debug, info};

use crate::scheduler::{SchedulerContext, SchedulerHandle, SchedulerStatus, SyncScheduler};
use crate::SyncError;

/// Account → scheduler supervisor
pub struct Orchestrator {
    ctx: SchedulerContext,
    schedulers: DashMap<PairingId, SchedulerHandle>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<dyn ITransferEngine>,
        activity: Arc<dyn IActivitySink>,
    ) -> Self {
        Self::with_context(SchedulerContext::new(config, engine, activity))
    }

    pub fn with_context(ctx: SchedulerContext) -> Self {
        Self {
            ctx,
            schedulers: DashMap::new(),
        }
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    /// Starts a scheduler for every enabled pairing of `account`
    ///
    /// Pairings that already have a scheduler are left running. A paused
    /// account starts nothing. Returns the number of schedulers started.
    ///
    /// # Errors
    /// `SyncError::NotAuthorized` if the account's credentials cannot sync.
    pub fn start(&self, account: &Account) -> Result<usize, SyncError> {
        if !account.can_sync() {
            return Err(SyncError::NotAuthorized(account.id()));
        }
        if account.is_paused() {
            debug!(account = %account.id(), "Account is paused, not starting");
            return Ok(0);
        }
        let started = self.start_enabled(account)?;
        info!(account = %account.id(), name = account.display_name(), started, "Account started");
        Ok(started)
    }

    fn start_enabled(&self, account: &Account) -> Result<usize, SyncError> {
        let mut started = 0;
        for pairing in account.enabled_pairings() {
            match self.add_pairing(account.id(), pairing.clone()) {
                Ok(()) => started += 1,
                Err(SyncError::AlreadyRunning(id)) => {
                    debug!(pairing = %id, "Scheduler already running");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(started)
    }

    /// Spawns a scheduler for one pairing
    ///
    /// # Errors
    /// `SyncError::AlreadyRunning` if the pairing already has one.
    pub fn add_pairing(&self, account_id: AccountId, pairing: Pairing) -> Result<(), SyncError> {
        match self.schedulers.entry(pairing.id()) {
            Entry::Occupied(_) => Err(SyncError::AlreadyRunning(pairing.id())),
            Entry::Vacant(slot) => {
                let handle = SyncScheduler::spawn(account_id, pairing, self.ctx.clone());
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Stops one pairing's scheduler and waits for it to release everything
    pub async fn remove_pairing(&self, pairing_id: PairingId) -> Result<(), SyncError> {
        let (_, handle) = self
            .schedulers
            .remove(&pairing_id)
            .ok_or(SyncError::NotRunning(pairing_id))?;
        handle.stop().await;
        Ok(())
    }

    /// Stops every scheduler belonging to `account_id`
    pub async fn stop(&self, account_id: AccountId) -> usize {
        let handles = self.take_where(|h| h.account_id() == account_id);
        let stopped = handles.len();
        stop_all(handles).await;
        info!(account = %account_id, stopped, "Account stopped");
        stopped
    }

    /// Starts a pairing's scheduler after it was enabled
    ///
    /// The pairing of a paused account stays stopped until the account is
    /// resumed.
    pub fn enable(&self, account: &Account, pairing_id: PairingId) -> Result<(), SyncError> {
        if !account.can_sync() {
            return Err(SyncError::NotAuthorized(account.id()));
        }
        let pairing = account
            .pairing(pairing_id)
            .ok_or_else(|| DomainError::PairingNotFound(pairing_id.to_string()))?;
        if account.is_paused() {
            debug!(pairing = %pairing_id, "Account is paused, pairing stays stopped");
            return Ok(());
        }
        self.add_pairing(account.id(), pairing.clone())
    }

    /// Stops a pairing's scheduler after it was disabled
    pub async fn disable(&self, pairing_id: PairingId) -> Result<(), SyncError> {
        self.remove_pairing(pairing_id).await
    }

    /// Stops every scheduler of an account without touching its pairings
    ///
    /// Passes in flight finish or are cancelled the same way as on
    /// [`stop`](Self::stop). Returns the number of schedulers stopped.
    pub async fn pause_account(&self, account_id: AccountId) -> usize {
        let handles = self.take_where(|h| h.account_id() == account_id);
        let paused = handles.len();
        stop_all(handles).await;
        info!(account = %account_id, paused, "Account paused");
        paused
    }

    /// Starts the enabled pairings of an account, regardless of its paused flag
    ///
    /// # Errors
    /// `SyncError::NotAuthorized` if the account's credentials cannot sync.
    pub fn resume_account(&self, account: &Account) -> Result<usize, SyncError> {
        if !account.can_sync() {
            return Err(SyncError::NotAuthorized(account.id()));
        }
        let resumed = self.start_enabled(account)?;
        info!(account = %account.id(), name = account.display_name(), resumed, "Account resumed");
        Ok(resumed)
    }

    /// Stops every scheduler of every account
    pub async fn pause_all(&self) -> usize {
        let handles = self.take_where(|_| true);
        let paused = handles.len();
        stop_all(handles).await;
        info!(paused, "All accounts paused");
        paused
    }

    /// Resumes every account that can sync; unauthorized ones are skipped
    pub fn resume_all(&self, accounts: &[Account]) -> Result<usize, SyncError> {
        let mut resumed = 0;
        for account in accounts {
            match self.resume_account(account) {
                Ok(count) => resumed += count,
                Err(SyncError::NotAuthorized(id)) => {
                    debug!(account = %id, "Skipping account that cannot sync");
                }
                Err(e) => return Err(e),
            }
        }
        info!(resumed, "All accounts resumed");
        Ok(resumed)
    }

    /// Stops the account's schedulers and drops its activity records
    pub async fn remove_account(&self, account_id: AccountId) {
        self.stop(account_id).await;
        self.ctx.activity.remove_account(account_id);
        info!(account = %account_id, "Account removed");
    }

    /// Forwards a user sync request to one pairing
    pub fn request_sync(&self, pairing_id: PairingId) -> Result<(), SyncError> {
        self.schedulers
            .get(&pairing_id)
            .ok_or(SyncError::NotRunning(pairing_id))?
            .request_sync()
    }

    /// Forwards a user sync request to every pairing of an account
    pub fn request_sync_account(&self, account_id: AccountId) -> usize {
        self.schedulers
            .iter()
            .filter(|h| h.account_id() == account_id)
            .filter(|h| h.request_sync().is_ok())
            .count()
    }

    pub fn resubscribe(&self, pairing_id: PairingId) -> Result<(), SyncError> {
        self.schedulers
            .get(&pairing_id)
            .ok_or(SyncError::NotRunning(pairing_id))?
            .resubscribe()
    }

    pub fn status(&self, pairing_id: PairingId) -> Option<SchedulerStatus> {
        self.schedulers.get(&pairing_id).map(|h| h.status())
    }

    /// Snapshot of every running scheduler's status
    pub fn statuses(&self) -> Vec<(AccountId, PairingId, SchedulerStatus)> {
        self.schedulers
            .iter()
            .map(|h| (h.account_id(), h.pairing_id(), h.status()))
            .collect()
    }

    pub fn is_running(&self, pairing_id: PairingId) -> bool {
        self.schedulers.contains_key(&pairing_id)
    }

    pub fn running(&self) -> usize {
        self.schedulers.len()
    }

    /// Brings the running set in line with a freshly loaded account list
    ///
    /// Stops schedulers whose pairing disappeared, was disabled or changed,
    /// and those of accounts that were paused or can no longer sync; starts
    /// the missing ones. Unchanged pairings keep running undisturbed.
    pub async fn reconcile(&self, accounts: &[Account]) -> Result<(), SyncError> {
        let wanted: Vec<(AccountId, &Pairing)> = accounts
            .iter()
            .filter(|a| a.is_active())
            .flat_map(|a| a.enabled_pairings().map(move |p| (a.id(), p)))
            .collect();
        let wanted_ids: HashSet<PairingId> = wanted.iter().map(|(_, p)| p.id()).collect();

        let stale = self.take_where(|h| {
            !wanted_ids.contains(&h.pairing_id())
                || wanted
                    .iter()
                    .any(|(a, p)| p.id() == h.pairing_id() && (*p != h.pairing() || *a != h.account_id()))
        });
        let stopped = stale.len();
        stop_all(stale).await;

        let mut started = 0;
        for (account_id, pairing) in wanted {
            match self.add_pairing(account_id, pairing.clone()) {
                Ok(()) => started += 1,
                Err(SyncError::AlreadyRunning(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!(stopped, started, running = self.running(), "Reconciled schedulers");
        Ok(())
    }

    /// Stops everything; every suspension token is released when this returns
    pub async fn shutdown(&self) {
        let handles = self.take_where(|_| true);
        let count = handles.len();
        stop_all(handles).await;
        info!(stopped = count, "Orchestrator shut down");
    }

    /// Removes matching handles from the map without awaiting under a shard lock
    fn take_where(&self, predicate: impl Fn(&SchedulerHandle) -> bool) -> Vec<SchedulerHandle> {
        let ids: Vec<PairingId> = self
            .schedulers
            .iter()
            .filter(|h| predicate(h.value()))
            .map(|h| *h.key())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.schedulers.remove(&id).map(|(_, h)| h))
            .collect()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("running", &self.schedulers.len())
            .finish()
    }
}

/// Stops handles concurrently so one slow pass does not delay the others
async fn stop_all(handles: Vec<SchedulerHandle>) {
    let mut set = tokio::task::JoinSet::new();
    for handle in handles {
        set.spawn(handle.stop());
    }
    while set.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lxmirror_core::config::ConfigBuilder;
    use lxmirror_core::domain::{ActivityRecord, AuthState, PairingMode};
    use lxmirror_core::ports::{EngineOutcome, SyncReport};
    use std::path::Path;
    use std::sync::Mutex;

    struct NoopEngine;

    #[async_trait]
    impl ITransferEngine for NoopEngine {
        async fn sync(&self, _pairing: &Pairing) -> anyhow::Result<SyncReport> {
            Ok(SyncReport::new(EngineOutcome::Success))
        }
        async fn move_remote(&self, _: &Pairing, _: &Path, _: &Path) -> anyhow::Result<EngineOutcome> {
            Ok(EngineOutcome::Success)
        }
        async fn mount(&self, _: AccountId, _pairing: &Pairing) -> anyhow::Result<EngineOutcome> {
            Ok(EngineOutcome::Success)
        }
        async fn unmount(&self, _pairing: &Pairing) -> anyhow::Result<EngineOutcome> {
            Ok(EngineOutcome::Success)
        }
    }

    #[derive(Default)]
    struct RemovedAccounts(Mutex<Vec<AccountId>>);

    impl IActivitySink for RemovedAccounts {
        fn record(&self, _record: ActivityRecord) {}
        fn remove_account(&self, account: AccountId) {
            self.0.lock().unwrap().push(account);
        }
    }

    fn orchestrator(sink: Arc<dyn IActivitySink>) -> (Orchestrator, tempfile::TempDir) {
        let state = tempfile::tempdir().unwrap();
        let config = ConfigBuilder::new()
            .locks_state_dir(state.path().to_path_buf())
            .build();
        let ctx = SchedulerContext::new(Arc::new(config), Arc::new(NoopEngine), sink).without_watcher();
        (Orchestrator::with_context(ctx), state)
    }

    fn account_with(pairings: &[&str]) -> Account {
        let mut account = Account::new("Work", "gdrive");
        for local in pairings {
            account
                .add_pairing(Pairing::new(PairingMode::Mirror, *local, "gdrive:x").unwrap())
                .unwrap();
        }
        account
    }

    #[tokio::test]
    async fn test_start_and_stop_account() {
        let (orch, _state) = orchestrator(Arc::new(RemovedAccounts::default()));
        let account = account_with(&["/a", "/b"]);
        assert_eq!(orch.start(&account).unwrap(), 2);
        assert_eq!(orch.running(), 2);

        // Starting twice does not double up
        assert_eq!(orch.start(&account).unwrap(), 0);
        assert_eq!(orch.stop(account.id()).await, 2);
        assert_eq!(orch.running(), 0);
    }

    #[tokio::test]
    async fn test_one_scheduler_per_pairing() {
        let (orch, _state) = orchestrator(Arc::new(RemovedAccounts::default()));
        let account = account_with(&["/a"]);
        let pairing = account.pairings()[0].clone();
        orch.add_pairing(account.id(), pairing.clone()).unwrap();
        let err = orch.add_pairing(account.id(), pairing).unwrap_err();
        assert!(matches!(err, SyncError::AlreadyRunning(_)));
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_unauthorized_account_is_refused() {
        let (orch, _state) = orchestrator(Arc::new(RemovedAccounts::default()));
        let mut account = account_with(&["/a"]);
        account.set_auth_state(AuthState::Revoked);
        assert!(matches!(orch.start(&account), Err(SyncError::NotAuthorized(_))));
        assert_eq!(orch.running(), 0);
    }

    #[tokio::test]
    async fn test_removing_one_pairing_leaves_others() {
        let (orch, _state) = orchestrator(Arc::new(RemovedAccounts::default()));
        let account = account_with(&["/a", "/b"]);
        orch.start(&account).unwrap();
        let (a, b) = (account.pairings()[0].id(), account.pairings()[1].id());

        orch.remove_pairing(a).await.unwrap();
        assert!(!orch.is_running(a));
        assert!(orch.is_running(b));
        assert!(matches!(orch.remove_pairing(a).await, Err(SyncError::NotRunning(_))));
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_account_clears_activity() {
        let sink = Arc::new(RemovedAccounts::default());
        let (orch, _state) = orchestrator(sink.clone());
        let account = account_with(&["/a"]);
        orch.start(&account).unwrap();

        orch.remove_account(account.id()).await;
        assert_eq!(orch.running(), 0);
        assert_eq!(*sink.0.lock().unwrap(), vec![account.id()]);
    }

    #[tokio::test]
    async fn test_reconcile_restarts_only_changed_pairings() {
        let (orch, _state) = orchestrator(Arc::new(RemovedAccounts::default()));
        let mut account = account_with(&["/a", "/b", "/c"]);
        orch.start(&account).unwrap();
        let ids: Vec<PairingId> = account.pairings().iter().map(|p| p.id()).collect();

        // /a unchanged, /b disabled, /c switched to stream
        account.pairing_mut(ids[1]).unwrap().set_enabled(false);
        account.pairing_mut(ids[2]).unwrap().set_mode(PairingMode::Stream);
        let added = Pairing::new(PairingMode::Mirror, "/d", "gdrive:d").unwrap();
        let added_id = added.id();
        account.add_pairing(added).unwrap();

        orch.reconcile(std::slice::from_ref(&account)).await.unwrap();
        assert!(orch.is_running(ids[0]));
        assert!(!orch.is_running(ids[1]));
        assert!(orch.is_running(ids[2]));
        assert!(orch.is_running(added_id));
        assert_eq!(orch.running(), 3);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_and_resume_account() {
        let (orch, _state) = orchestrator(Arc::new(RemovedAccounts::default()));
        let work = account_with(&["/a", "/b"]);
        let home = account_with(&["/c"]);
        orch.start(&work).unwrap();
        orch.start(&home).unwrap();

        assert_eq!(orch.pause_account(work.id()).await, 2);
        assert_eq!(orch.running(), 1);
        assert!(orch.is_running(home.pairings()[0].id()));

        assert_eq!(orch.resume_account(&work).unwrap(), 2);
        assert_eq!(orch.running(), 3);
        // Resuming a running account starts nothing new
        assert_eq!(orch.resume_account(&work).unwrap(), 0);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_paused_account_is_not_started() {
        let (orch, _state) = orchestrator(Arc::new(RemovedAccounts::default()));
        let mut account = account_with(&["/a"]);
        account.set_paused(true);
        assert_eq!(orch.start(&account).unwrap(), 0);

        let pairing_id = account.pairings()[0].id();
        orch.enable(&account, pairing_id).unwrap();
        assert_eq!(orch.running(), 0);

        orch.reconcile(std::slice::from_ref(&account)).await.unwrap();
        assert_eq!(orch.running(), 0);

        account.set_paused(false);
        orch.reconcile(std::slice::from_ref(&account)).await.unwrap();
        assert!(orch.is_running(pairing_id));
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconcile_stops_newly_paused_account() {
        let (orch, _state) = orchestrator(Arc::new(RemovedAccounts::default()));
        let mut account = account_with(&["/a", "/b"]);
        orch.start(&account).unwrap();

        account.set_paused(true);
        orch.reconcile(std::slice::from_ref(&account)).await.unwrap();
        assert_eq!(orch.running(), 0);
        // Pairings keep their own flags
        assert_eq!(account.enabled_pairings().count(), 2);
    }

    #[tokio::test]
    async fn test_pause_all_and_resume_all() {
        let (orch, _state) = orchestrator(Arc::new(RemovedAccounts::default()));
        let work = account_with(&["/a", "/b"]);
        let mut revoked = account_with(&["/c"]);
        revoked.set_auth_state(AuthState::Revoked);
        orch.start(&work).unwrap();

        assert_eq!(orch.pause_all().await, 2);
        assert_eq!(orch.running(), 0);

        let accounts = vec![work, revoked];
        assert_eq!(orch.resume_all(&accounts).unwrap(), 2);
        assert_eq!(orch.running(), 2);
        assert!(!orch.is_running(accounts[1].pairings()[0].id()));
        orch.shutdown().await;
    }
}
