//! Per-pairing sync scheduler
//!
//! One [`SyncScheduler`] task runs per enabled pairing. A mirror pairing's
//! task owns the pairing's [`FileWatcher`], feeds drained events through the
//! [`Disambiguator`], and decides whether each logical change becomes an
//! immediate server-side move or a debounced full pass.
//!
//! ## State machine
//!
//! ```text
//!            ┌──────────── moved event: move_remote ─────────────┐
//!            ▼                                                   │
//!   Idle ──→ Suspending ──→ Syncing ──→ Resuming ──→ Idle ───────┘
//!                              │
//!                              └──→ ErrorBackoff ──(retry)──→ Suspending
//!                                        │
//!                                        └──(retry ceiling)──→ Blocked
//! ```
//!
//! The [`SuspensionGuard`](crate::suspension::SuspensionGuard) for a pass is
//! taken before lock recovery and dropped when the pass scope ends, on every
//! exit path including cancellation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lxmirror_core::config::Config;
use lxmirror_core::domain::{
    AccountId, ActivityKind, ActivityRecord, ChangeEvent, ChangeKind, Outcome, Pairing, PairingId,
    PairingMode,
};
use lxmirror_core::ports::{EngineOutcome, FileActionKind, IActivitySink, ITransferEngine};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::disambiguator::Disambiguator;
use crate::filter::TempFileFilter;
use crate::fingerprint::Fingerprinter;
use crate::lock_recovery::{session_stem, LockRecovery, PassRegistry};
use crate::watcher::{FileWatcher, WatchFeed};
use crate::SyncError;

// ============================================================================
// Public state types
// ============================================================================

/// Where a scheduler is in its state machine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SchedulerState {
    #[default]
    Idle,
    /// Waiting for a pass permit, then suspending the watcher
    Suspending,
    /// Lock recovery and the engine pass are running
    Syncing,
    /// Releasing the watcher suspension
    Resuming,
    /// Waiting to retry after a failed pass
    ErrorBackoff { attempt: u32, retry_in: Duration },
    /// Repeated fatal failures; only a user sync request runs a pass
    Blocked,
    /// The filesystem subscription is gone; passes are suspended
    WatchLost,
    /// Stream pairing is mounted
    Mounted,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Suspending => write!(f, "suspending"),
            SchedulerState::Syncing => write!(f, "syncing"),
            SchedulerState::Resuming => write!(f, "resuming"),
            SchedulerState::ErrorBackoff { attempt, retry_in } => {
                write!(f, "backoff (attempt {attempt}, retry in {}s)", retry_in.as_secs())
            }
            SchedulerState::Blocked => write!(f, "blocked"),
            SchedulerState::WatchLost => write!(f, "watch lost"),
            SchedulerState::Mounted => write!(f, "mounted"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot published on every state change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    /// Completed passes (successful or not) since start
    pub passes: u64,
}

/// User intents delivered to a running scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Run a pass now, even from backoff or the blocked state
    SyncNow,
    /// Re-create a lost filesystem subscription
    Resubscribe,
}

/// How a single pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Success { actions: usize },
    Partial(String),
    Fatal(String),
    TimedOut,
    /// Stopped before the engine finished
    Cancelled,
}

impl PassOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PassOutcome::Success { .. })
    }
}

// ============================================================================
// SchedulerContext
// ============================================================================

/// Collaborators shared by every scheduler of one orchestrator
#[derive(Clone)]
pub struct SchedulerContext {
    pub config: Arc<Config>,
    pub engine: Arc<dyn ITransferEngine>,
    pub activity: Arc<dyn IActivitySink>,
    /// Global cap on concurrent engine invocations
    pub permits: Arc<Semaphore>,
    pub locks: LockRecovery,
    /// Start an OS watch for mirror pairings (disabled for one-shot passes)
    pub watch_filesystem: bool,
}

impl SchedulerContext {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<dyn ITransferEngine>,
        activity: Arc<dyn IActivitySink>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.sync.max_concurrent_passes.max(1)));
        let locks = LockRecovery::from_config(&config.locks, PassRegistry::new());
        Self {
            config,
            engine,
            activity,
            permits,
            locks,
            watch_filesystem: true,
        }
    }

    pub fn without_watcher(mut self) -> Self {
        self.watch_filesystem = false;
        self
    }

    fn record(&self, record: ActivityRecord) {
        self.activity.record(record);
    }
}

impl std::fmt::Debug for SchedulerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerContext")
            .field("permits", &self.permits.available_permits())
            .field("locks", &self.locks)
            .field("watch_filesystem", &self.watch_filesystem)
            .finish()
    }
}

// ============================================================================
// SchedulerHandle
// ============================================================================

/// Owner-side handle to a running scheduler task
#[derive(Debug)]
pub struct SchedulerHandle {
    account_id: AccountId,
    pairing: Pairing,
    commands: mpsc::UnboundedSender<SchedulerCommand>,
    status: watch::Receiver<SchedulerStatus>,
    cancel: CancellationToken,
    feed: WatchFeed,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn pairing_id(&self) -> PairingId {
        self.pairing.id()
    }

    pub fn pairing(&self) -> &Pairing {
        &self.pairing
    }

    /// Asks for an immediate pass, bypassing debounce and backoff
    pub fn request_sync(&self) -> Result<(), SyncError> {
        self.send(SchedulerCommand::SyncNow)
    }

    pub fn resubscribe(&self) -> Result<(), SyncError> {
        self.send(SchedulerCommand::Resubscribe)
    }

    fn send(&self, command: SchedulerCommand) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::NotRunning(self.pairing.id()))
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    /// The watcher's buffer and suspension flag
    pub fn feed(&self) -> &WatchFeed {
        &self.feed
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the task and waits until it has released everything it held
    ///
    /// An in-flight pass gets `sync.stop_grace` to finish before it is dropped.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(pairing = %self.pairing.id(), error = %e, "Scheduler task panicked");
        }
    }
}

// ============================================================================
// DebouncedTrigger
// ============================================================================

/// Coalesces bursts of significant changes into one pending pass
///
/// Once armed by [`fire_now`](Self::fire_now) the trigger stays immediate
/// until taken; later changes join the pending pass without delaying it.
#[derive(Debug)]
pub(crate) struct DebouncedTrigger {
    quiet: Duration,
    due: Option<Instant>,
    immediate: bool,
    coalesced: u32,
}

impl DebouncedTrigger {
    pub(crate) fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            due: None,
            immediate: false,
            coalesced: 0,
        }
    }

    /// Records a change; the pass waits for `quiet` after the latest one
    pub(crate) fn bump(&mut self, now: Instant) {
        if !self.immediate {
            self.due = Some(now + self.quiet);
        }
        self.coalesced += 1;
    }

    pub(crate) fn fire_now(&mut self) {
        self.due = Some(Instant::now());
        self.immediate = true;
        self.coalesced += 1;
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.due
    }

    /// Consumes the pending trigger, returning how many requests it covered
    pub(crate) fn take(&mut self) -> u32 {
        self.due = None;
        self.immediate = false;
        std::mem::take(&mut self.coalesced)
    }
}

// ============================================================================
// SyncScheduler
// ============================================================================

/// Task driving one pairing
pub struct SyncScheduler {
    account_id: AccountId,
    pairing: Pairing,
    ctx: SchedulerContext,
    feed: WatchFeed,
    cancel: CancellationToken,
    status: watch::Sender<SchedulerStatus>,
    disambiguator: Disambiguator,
    trigger: DebouncedTrigger,
    watcher: Option<FileWatcher>,
    /// Consecutive failed passes, drives the backoff delay
    failures: u32,
    /// Consecutive fatal outcomes, compared against the retry ceiling
    fatal_failures: u32,
    retry_at: Option<Instant>,
    blocked: bool,
    watch_lost: bool,
    /// A user asked for a pass; it runs even when blocked
    manual: bool,
}

impl SyncScheduler {
    /// Spawns the scheduler task for one pairing
    pub fn spawn(account_id: AccountId, pairing: Pairing, ctx: SchedulerContext) -> SchedulerHandle {
        let config = Arc::clone(&ctx.config);
        let feed = WatchFeed::new(config.watcher.buffer_capacity, config.watcher.resume_grace());
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(SchedulerStatus::default());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let scheduler = SyncScheduler {
            account_id,
            pairing: pairing.clone(),
            feed: feed.clone(),
            cancel: cancel.clone(),
            status: status_tx,
            disambiguator: Disambiguator::from_config(&config.rename),
            trigger: DebouncedTrigger::new(config.sync.debounce()),
            watcher: None,
            failures: 0,
            fatal_failures: 0,
            retry_at: None,
            blocked: false,
            watch_lost: false,
            manual: false,
            ctx,
        };

        info!(
            pairing = %pairing.id(),
            mode = %pairing.mode(),
            local = %pairing.local_root().display(),
            remote = pairing.remote_root(),
            "Starting scheduler"
        );
        let task = tokio::spawn(async move {
            match scheduler.pairing.mode() {
                PairingMode::Mirror => scheduler.run_mirror(cmd_rx).await,
                PairingMode::Stream => scheduler.run_stream(cmd_rx).await,
            }
        });

        SchedulerHandle {
            account_id,
            pairing,
            commands: cmd_tx,
            status: status_rx,
            cancel,
            feed,
            task,
        }
    }

    /// Runs exactly one pass in the foreground, without a watcher
    ///
    /// Goes through the same suspend/recover/sync/resume routine as the
    /// background loop.
    pub async fn run_once(
        account_id: AccountId,
        pairing: &Pairing,
        ctx: &SchedulerContext,
        cancel: &CancellationToken,
    ) -> PassOutcome {
        let feed = WatchFeed::new(1, Duration::ZERO);
        let outcome = execute_pass(ctx, account_id, pairing, &feed, cancel, |_| {}).await;
        if let Some(message) = failure_message(&outcome) {
            ctx.record(
                ActivityRecord::new(account_id, ActivityKind::Sync, Outcome::failure(message))
                    .with_pairing(pairing.id()),
            );
        }
        outcome
    }

    // ------------------------------------------------------------------
    // Mirror loop
    // ------------------------------------------------------------------

    async fn run_mirror(mut self, mut commands: mpsc::UnboundedReceiver<SchedulerCommand>) {
        if let Err(e) = self.subscribe().await {
            self.on_watch_lost(e.to_string());
        } else {
            // Reconcile whatever changed while nothing was watching
            self.trigger.fire_now();
        }

        let poll_every = self.ctx.config.sync.poll_interval();
        let mut poll = tokio::time::interval_at(Instant::now() + poll_every, poll_every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let trigger_at = if self.can_auto_sync() || self.manual {
                self.trigger.deadline()
            } else {
                None
            };
            let sweep_at = self.disambiguator.next_deadline();
            let retry_at = self.retry_at.filter(|_| !self.blocked && !self.watch_lost);

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                command = commands.recv() => match command {
                    Some(SchedulerCommand::SyncNow) => self.on_sync_now().await,
                    Some(SchedulerCommand::Resubscribe) => self.resubscribe().await,
                    None => break,
                },

                _ = self.feed.buffer.ready() => self.ingest().await,

                _ = sleep_until_opt(sweep_at) => {
                    let ready = self.disambiguator.sweep(Instant::now());
                    self.route(ready).await;
                }

                _ = sleep_until_opt(retry_at) => {
                    self.retry_at = None;
                    debug!(pairing = %self.pairing.id(), "Backoff elapsed, retrying");
                    self.trigger.fire_now();
                }

                _ = poll.tick() => {
                    if self.can_auto_sync() {
                        debug!(pairing = %self.pairing.id(), "Periodic pass");
                        self.trigger.fire_now();
                    }
                }

                _ = sleep_until_opt(trigger_at) => {
                    let coalesced = self.trigger.take();
                    debug!(pairing = %self.pairing.id(), coalesced, "Trigger fired");
                    self.run_pass().await;
                }
            }
        }

        self.watcher = None;
        self.set_state(SchedulerState::Stopped);
        info!(pairing = %self.pairing.id(), "Scheduler stopped");
    }

    fn can_auto_sync(&self) -> bool {
        !self.blocked && !self.watch_lost && self.retry_at.is_none()
    }

    async fn on_sync_now(&mut self) {
        info!(pairing = %self.pairing.id(), "User-initiated sync requested");
        if self.watch_lost {
            self.resubscribe().await;
            if self.watch_lost {
                warn!(pairing = %self.pairing.id(), "Sync refused while the watch is lost");
                return;
            }
        }
        self.retry_at = None;
        self.manual = true;
        self.trigger.fire_now();
    }

    /// Drains the watch buffer into the disambiguator
    async fn ingest(&mut self) {
        let drained = self.feed.buffer.drain();
        if let Some(reason) = drained.lost {
            self.on_watch_lost(reason);
            return;
        }
        if self.watch_lost {
            return;
        }

        let now = Instant::now();
        if drained.overflowed {
            warn!(pairing = %self.pairing.id(), "Events were dropped, scheduling a full pass");
            self.trigger.bump(now);
        }
        if drained.suppressed {
            debug!(pairing = %self.pairing.id(), "Changes arrived during a pass, scheduling a follow-up");
            self.trigger.bump(now + self.ctx.config.watcher.resume_grace());
        }
        let mut ready = Vec::new();
        for raw in drained.events {
            ready.extend(self.disambiguator.push(raw, now));
        }
        self.route(ready).await;
    }

    /// Moves become server-side renames; everything else feeds the trigger
    async fn route(&mut self, events: Vec<ChangeEvent>) {
        for event in events {
            match &event.kind {
                ChangeKind::Moved { from } if self.can_auto_sync() => {
                    let from = from.clone();
                    if !self.server_side_move(&from, &event).await {
                        self.trigger.bump(Instant::now());
                    }
                }
                _ => {
                    debug!(pairing = %self.pairing.id(), path = %event.path.display(), kind = ?event.kind, "Change queued");
                    self.trigger.bump(Instant::now());
                }
            }
        }
    }

    /// Returns false if the caller should fall back to a full pass
    async fn server_side_move(&self, from: &std::path::Path, event: &ChangeEvent) -> bool {
        let (Some(rel_from), Some(rel_to)) = (
            self.pairing.relative_path(from),
            self.pairing.relative_path(&event.path),
        ) else {
            return false;
        };

        let Some(_permit) = acquire_permit(&self.ctx.permits, &self.cancel).await else {
            return true;
        };
        let result = tokio::select! {
            result = self.ctx.engine.move_remote(&self.pairing, rel_from, rel_to) => result,
            _ = self.cancel.cancelled() => return true,
        };

        match result {
            Ok(EngineOutcome::Success) => {
                info!(
                    pairing = %self.pairing.id(),
                    from = %rel_from.display(),
                    to = %rel_to.display(),
                    "Server-side move"
                );
                self.ctx.record(
                    ActivityRecord::new(self.account_id, ActivityKind::Rename, Outcome::Success)
                        .with_pairing(self.pairing.id())
                        .with_path(rel_to.to_string_lossy())
                        .with_prior_path(rel_from.to_string_lossy()),
                );
                true
            }
            Ok(outcome) => {
                warn!(
                    pairing = %self.pairing.id(),
                    detail = outcome.detail().unwrap_or_default(),
                    "Server-side move failed, falling back to a full pass"
                );
                false
            }
            Err(e) => {
                warn!(pairing = %self.pairing.id(), error = %e, "Server-side move failed, falling back to a full pass");
                false
            }
        }
    }

    async fn run_pass(&mut self) {
        let was_manual = std::mem::take(&mut self.manual);
        // Everything pending is covered by the pass
        self.disambiguator.clear();

        let status = &self.status;
        let outcome = execute_pass(
            &self.ctx,
            self.account_id,
            &self.pairing,
            &self.feed,
            &self.cancel,
            |state| status.send_modify(|s| s.state = state),
        )
        .await;
        // Anything buffered during the pass came from the pass itself
        self.feed.buffer.discard_events();
        self.trigger.take();

        if outcome != PassOutcome::Cancelled {
            self.status.send_modify(|s| s.passes += 1);
        }
        match outcome {
            PassOutcome::Success { actions } => {
                if self.blocked {
                    info!(pairing = %self.pairing.id(), "Pass succeeded, pairing unblocked");
                }
                self.failures = 0;
                self.fatal_failures = 0;
                self.blocked = false;
                self.retry_at = None;
                debug!(pairing = %self.pairing.id(), actions, manual = was_manual, "Pass complete");
                self.status.send_modify(|s| {
                    s.state = SchedulerState::Idle;
                    s.last_error = None;
                    s.consecutive_failures = 0;
                    s.last_success = Some(Utc::now());
                });
            }
            PassOutcome::Partial(detail) => self.enter_backoff(detail, false),
            PassOutcome::TimedOut => self.enter_backoff("pass timed out".to_string(), false),
            PassOutcome::Fatal(detail) => self.enter_backoff(detail, true),
            PassOutcome::Cancelled => {}
        }
    }

    fn enter_backoff(&mut self, detail: String, fatal: bool) {
        self.failures += 1;
        if fatal {
            self.fatal_failures += 1;
        }
        self.ctx.record(
            ActivityRecord::new(self.account_id, ActivityKind::Sync, Outcome::failure(&detail))
                .with_pairing(self.pairing.id()),
        );

        let ceiling = self.ctx.config.backoff.retry_ceiling;
        if self.blocked || (fatal && self.fatal_failures >= ceiling) {
            if !self.blocked {
                error!(
                    pairing = %self.pairing.id(),
                    failures = self.fatal_failures,
                    detail = %detail,
                    "Retry ceiling reached, sync suspended until user action"
                );
                self.ctx.record(
                    ActivityRecord::new(
                        self.account_id,
                        ActivityKind::Error,
                        Outcome::failure(format!(
                            "sync suspended after {} failed attempts: {detail}",
                            self.fatal_failures
                        )),
                    )
                    .with_pairing(self.pairing.id()),
                );
            }
            self.blocked = true;
            self.retry_at = None;
            let failures = self.failures;
            self.status.send_modify(|s| {
                s.state = SchedulerState::Blocked;
                s.last_error = Some(detail);
                s.consecutive_failures = failures;
            });
            return;
        }

        let delay = self.ctx.config.backoff.delay_for(self.failures);
        warn!(
            pairing = %self.pairing.id(),
            attempt = self.failures,
            delay_secs = delay.as_secs(),
            detail = %detail,
            "Pass failed, backing off"
        );
        self.retry_at = Some(Instant::now() + delay);
        let attempt = self.failures;
        self.status.send_modify(|s| {
            s.state = SchedulerState::ErrorBackoff {
                attempt,
                retry_in: delay,
            };
            s.last_error = Some(detail);
            s.consecutive_failures = attempt;
        });
    }

    // ------------------------------------------------------------------
    // Subscription
    // ------------------------------------------------------------------

    async fn subscribe(&mut self) -> Result<(), SyncError> {
        if !self.ctx.watch_filesystem {
            return Ok(());
        }
        let root = self.pairing.local_root().to_path_buf();
        let feed = self.feed.clone();
        let filter = TempFileFilter::from_config(&self.ctx.config.watcher)
            .with_filters(&self.ctx.config.filters);
        let fingerprinter = Fingerprinter::from_config(&self.ctx.config.rename);

        let path = root.clone();
        let started =
            tokio::task::spawn_blocking(move || FileWatcher::start(&path, &feed, filter, fingerprinter))
                .await
                .map_err(|e| SyncError::WatchFailed {
                    path: root.clone(),
                    reason: e.to_string(),
                })?;
        let watcher = started.map_err(|e| SyncError::WatchFailed {
            path: root,
            reason: format!("{e:#}"),
        })?;
        self.watcher = Some(watcher);
        Ok(())
    }

    async fn resubscribe(&mut self) {
        info!(pairing = %self.pairing.id(), "Re-creating filesystem subscription");
        self.watcher = None;
        // Clear a stale lost flag from the old subscription
        let _ = self.feed.buffer.drain();
        match self.subscribe().await {
            Ok(()) => {
                self.watch_lost = false;
                self.disambiguator.clear();
                self.set_state(SchedulerState::Idle);
                self.trigger.fire_now();
            }
            Err(e) => warn!(pairing = %self.pairing.id(), error = %e, "Resubscribe failed"),
        }
    }

    fn on_watch_lost(&mut self, reason: String) {
        if self.watch_lost {
            return;
        }
        warn!(pairing = %self.pairing.id(), reason = %reason, "Filesystem subscription lost");
        self.watcher = None;
        self.watch_lost = true;
        self.disambiguator.clear();
        self.trigger.take();
        self.ctx.record(
            ActivityRecord::new(self.account_id, ActivityKind::WatchLost, Outcome::failure(&reason))
                .with_pairing(self.pairing.id())
                .with_path(""),
        );
        self.status.send_modify(|s| {
            s.state = SchedulerState::WatchLost;
            s.last_error = Some(reason);
        });
    }

    // ------------------------------------------------------------------
    // Stream loop
    // ------------------------------------------------------------------

    async fn run_stream(mut self, mut commands: mpsc::UnboundedReceiver<SchedulerCommand>) {
        let mut mounted = false;
        let mut attempt = true;

        loop {
            if attempt && !mounted {
                attempt = false;
                mounted = self.try_mount().await;
            }

            let retry_at = if mounted || self.blocked {
                None
            } else {
                self.retry_at
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(SchedulerCommand::SyncNow) if !mounted => {
                        info!(pairing = %self.pairing.id(), "User requested a mount retry");
                        self.retry_at = None;
                        attempt = true;
                    }
                    Some(command) => {
                        debug!(pairing = %self.pairing.id(), ?command, "Command ignored for mounted pairing");
                    }
                    None => break,
                },
                _ = sleep_until_opt(retry_at) => {
                    self.retry_at = None;
                    attempt = true;
                }
            }
        }

        if mounted {
            match self.ctx.engine.unmount(&self.pairing).await {
                Ok(EngineOutcome::Success) => {
                    info!(pairing = %self.pairing.id(), "Unmounted");
                    self.record_simple(ActivityKind::Unmount, Outcome::Success);
                }
                Ok(outcome) => {
                    let detail = outcome.detail().unwrap_or_default().to_string();
                    warn!(pairing = %self.pairing.id(), detail = %detail, "Unmount failed");
                    self.record_simple(ActivityKind::Unmount, Outcome::failure(detail));
                }
                Err(e) => {
                    warn!(pairing = %self.pairing.id(), error = %e, "Unmount failed");
                    self.record_simple(ActivityKind::Unmount, Outcome::failure(format!("{e:#}")));
                }
            }
        }
        self.set_state(SchedulerState::Stopped);
        info!(pairing = %self.pairing.id(), "Scheduler stopped");
    }

    async fn try_mount(&mut self) -> bool {
        match self.ctx.engine.mount(self.account_id, &self.pairing).await {
            Ok(EngineOutcome::Success) => {
                info!(pairing = %self.pairing.id(), "Mounted");
                self.record_simple(ActivityKind::Mount, Outcome::Success);
                self.failures = 0;
                self.fatal_failures = 0;
                self.blocked = false;
                self.retry_at = None;
                self.status.send_modify(|s| {
                    s.state = SchedulerState::Mounted;
                    s.last_error = None;
                    s.consecutive_failures = 0;
                    s.last_success = Some(Utc::now());
                });
                true
            }
            Ok(outcome) => {
                let fatal = matches!(outcome, EngineOutcome::Fatal(_));
                let detail = outcome.detail().unwrap_or_default().to_string();
                self.on_mount_failed(detail, fatal);
                false
            }
            Err(e) => {
                self.on_mount_failed(format!("{e:#}"), true);
                false
            }
        }
    }

    fn on_mount_failed(&mut self, detail: String, fatal: bool) {
        self.record_simple(ActivityKind::Mount, Outcome::failure(&detail));
        self.failures += 1;
        if fatal {
            self.fatal_failures += 1;
        }
        let failures = self.failures;
        if fatal && self.fatal_failures >= self.ctx.config.backoff.retry_ceiling {
            error!(pairing = %self.pairing.id(), detail = %detail, "Mount keeps failing, waiting for user action");
            self.blocked = true;
            self.retry_at = None;
            self.status.send_modify(|s| {
                s.state = SchedulerState::Blocked;
                s.last_error = Some(detail);
                s.consecutive_failures = failures;
            });
            return;
        }
        let delay = self.ctx.config.backoff.delay_for(failures);
        warn!(pairing = %self.pairing.id(), attempt = failures, delay_secs = delay.as_secs(), detail = %detail, "Mount failed, backing off");
        self.retry_at = Some(Instant::now() + delay);
        self.status.send_modify(|s| {
            s.state = SchedulerState::ErrorBackoff {
                attempt: failures,
                retry_in: delay,
            };
            s.last_error = Some(detail);
            s.consecutive_failures = failures;
        });
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn set_state(&self, state: SchedulerState) {
        self.status.send_modify(|s| s.state = state);
    }

    fn record_simple(&self, kind: ActivityKind, outcome: Outcome) {
        self.ctx.record(
            ActivityRecord::new(self.account_id, kind, outcome).with_pairing(self.pairing.id()),
        );
    }
}

// ============================================================================
// The pass routine
// ============================================================================

/// Suspend, recover locks, run the engine, resume
///
/// The suspension guard and the pass ticket live in this scope, so they are
/// released when it returns or when the future is dropped.
async fn execute_pass(
    ctx: &SchedulerContext,
    account_id: AccountId,
    pairing: &Pairing,
    feed: &WatchFeed,
    cancel: &CancellationToken,
    on_state: impl Fn(SchedulerState),
) -> PassOutcome {
    on_state(SchedulerState::Suspending);
    let Some(_permit) = acquire_permit(&ctx.permits, cancel).await else {
        on_state(SchedulerState::Idle);
        return PassOutcome::Cancelled;
    };
    let guard = feed.suspension.acquire();
    feed.buffer.discard_events();
    // This pass covers whatever was suppressed before it
    feed.buffer.take_suppressed();

    on_state(SchedulerState::Syncing);
    recover_locks(ctx, account_id, pairing).await;
    let ticket = ctx.locks.registry().register(session_stem(pairing));

    info!(pairing = %pairing.id(), "Starting sync pass");
    let pass = tokio::time::timeout(ctx.config.sync.pass_timeout(), ctx.engine.sync(pairing));
    tokio::pin!(pass);
    let result = tokio::select! {
        result = &mut pass => result,
        _ = cancel.cancelled() => {
            let grace = ctx.config.sync.stop_grace();
            info!(pairing = %pairing.id(), grace_secs = grace.as_secs(), "Stop requested during pass, waiting");
            match tokio::time::timeout(grace, &mut pass).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(pairing = %pairing.id(), "Pass did not finish within the stop grace, abandoning");
                    return PassOutcome::Cancelled;
                }
            }
        }
    };

    on_state(SchedulerState::Resuming);
    drop(ticket);
    drop(guard);

    let outcome = match result {
        Ok(Ok(report)) => {
            for action in &report.actions {
                let kind = match action.kind {
                    FileActionKind::Upload => ActivityKind::Upload,
                    FileActionKind::Download => ActivityKind::Download,
                    FileActionKind::Delete => ActivityKind::Delete,
                };
                ctx.record(
                    ActivityRecord::new(account_id, kind, Outcome::Success)
                        .with_pairing(pairing.id())
                        .with_path(action.path.to_string_lossy()),
                );
            }
            match report.outcome {
                EngineOutcome::Success => PassOutcome::Success {
                    actions: report.actions.len(),
                },
                EngineOutcome::PartialFailure(detail) => PassOutcome::Partial(detail),
                EngineOutcome::Fatal(detail) => PassOutcome::Fatal(detail),
            }
        }
        Ok(Err(e)) => PassOutcome::Fatal(format!("{e:#}")),
        Err(_) => PassOutcome::TimedOut,
    };

    if let PassOutcome::Success { actions } = outcome {
        info!(pairing = %pairing.id(), actions, "Sync pass succeeded");
        ctx.record(ActivityRecord::new(account_id, ActivityKind::Sync, Outcome::Success).with_pairing(pairing.id()));
    }
    on_state(SchedulerState::Idle);
    outcome
}

async fn recover_locks(ctx: &SchedulerContext, account_id: AccountId, pairing: &Pairing) {
    let locks = ctx.locks.clone();
    let owned = pairing.clone();
    match tokio::task::spawn_blocking(move || locks.recover(&owned)).await {
        Ok(Ok(report)) => {
            for path in &report.removed {
                ctx.record(
                    ActivityRecord::new(account_id, ActivityKind::LockRecovered, Outcome::Success)
                        .with_pairing(pairing.id())
                        .with_path(path.to_string_lossy()),
                );
            }
            if !report.kept.is_empty() {
                info!(pairing = %pairing.id(), kept = report.kept.len(), "Lock artifacts may belong to a live pass");
            }
        }
        Ok(Err(e)) => warn!(pairing = %pairing.id(), error = %e, "Lock recovery failed"),
        Err(e) => warn!(pairing = %pairing.id(), error = %e, "Lock recovery task failed"),
    }
}

/// Waits for a global pass permit unless the scheduler is being stopped
async fn acquire_permit(
    permits: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = Arc::clone(permits).acquire_owned() => permit.ok(),
    }
}

fn failure_message(outcome: &PassOutcome) -> Option<String> {
    match outcome {
        PassOutcome::Partial(d) | PassOutcome::Fatal(d) => Some(d.clone()),
        PassOutcome::TimedOut => Some("pass timed out".to_string()),
        PassOutcome::Success { .. } | PassOutcome::Cancelled => None,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
