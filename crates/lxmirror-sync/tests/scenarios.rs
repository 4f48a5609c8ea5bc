//! End-to-end scheduler scenarios against a scripted transfer engine
//!
//! Most scenarios run without a real filesystem subscription and inject
//! events straight into the scheduler's feed, which keeps them independent of
//! inotify timing. `test_real_rename_is_forwarded_as_move` exercises the real
//! watcher.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use lxmirror_core::config::{Config, ConfigBuilder};
use lxmirror_core::domain::{
    AccountId, ActivityKind, ActivityRecord, ChangeEvent, Pairing, PairingMode,
};
use lxmirror_core::ports::{EngineOutcome, FileAction, FileActionKind, ITransferEngine, SyncReport};
use lxmirror_store::ActivityLog;
use lxmirror_sync::lock_recovery::session_stem;
use lxmirror_sync::{
    Fingerprint, PassOutcome, RawEvent, SchedulerContext, SchedulerHandle, SchedulerState,
    SchedulerStatus, SyncScheduler,
};
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Scripted engine
// ============================================================================

/// What the next sync calls return
#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Partial,
    Fatal,
    Error,
}

type SyncHook = Box<dyn Fn(&Pairing) + Send + Sync>;

struct ScriptedEngine {
    behavior: Mutex<Behavior>,
    /// One-shot outcomes consumed before `behavior` applies
    queued: Mutex<VecDeque<Behavior>>,
    sync_delay: Mutex<Duration>,
    syncs: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    moves: Mutex<Vec<(PathBuf, PathBuf)>>,
    mounts: AtomicUsize,
    unmounts: AtomicUsize,
    on_sync: Mutex<Option<SyncHook>>,
}

impl ScriptedEngine {
    fn new() -> Self {
        Self {
            behavior: Mutex::new(Behavior::Succeed),
            queued: Mutex::new(VecDeque::new()),
            sync_delay: Mutex::new(Duration::ZERO),
            syncs: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            moves: Mutex::new(Vec::new()),
            mounts: AtomicUsize::new(0),
            unmounts: AtomicUsize::new(0),
            on_sync: Mutex::new(None),
        }
    }

    fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    fn queue(&self, behavior: Behavior) {
        self.queued.lock().unwrap().push_back(behavior);
    }

    fn set_delay(&self, delay: Duration) {
        *self.sync_delay.lock().unwrap() = delay;
    }

    fn on_sync(&self, hook: impl Fn(&Pairing) + Send + Sync + 'static) {
        *self.on_sync.lock().unwrap() = Some(Box::new(hook));
    }

    fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    fn moves(&self) -> Vec<(PathBuf, PathBuf)> {
        self.moves.lock().unwrap().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ITransferEngine for ScriptedEngine {
    async fn sync(&self, pairing: &Pairing) -> anyhow::Result<SyncReport> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if let Some(hook) = self.on_sync.lock().unwrap().as_ref() {
            hook(pairing);
        }
        let delay = *self.sync_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behavior = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.behavior.lock().unwrap().clone());
        match behavior {
            Behavior::Succeed => Ok(SyncReport::new(EngineOutcome::Success).with_actions(vec![
                FileAction {
                    kind: FileActionKind::Upload,
                    path: PathBuf::from("notes.txt"),
                },
            ])),
            Behavior::Partial => Ok(SyncReport::new(EngineOutcome::PartialFailure(
                "rate limited".into(),
            ))),
            Behavior::Fatal => Ok(SyncReport::new(EngineOutcome::Fatal(
                "remote not found".into(),
            ))),
            Behavior::Error => Err(anyhow::anyhow!("engine binary missing")),
        }
    }

    async fn move_remote(
        &self,
        _pairing: &Pairing,
        from: &Path,
        to: &Path,
    ) -> anyhow::Result<EngineOutcome> {
        self.moves
            .lock()
            .unwrap()
            .push((from.to_path_buf(), to.to_path_buf()));
        Ok(EngineOutcome::Success)
    }

    async fn mount(&self, _account: AccountId, _pairing: &Pairing) -> anyhow::Result<EngineOutcome> {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Ok(EngineOutcome::Success)
    }

    async fn unmount(&self, _pairing: &Pairing) -> anyhow::Result<EngineOutcome> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        Ok(EngineOutcome::Success)
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    engine: Arc<ScriptedEngine>,
    activity: ActivityLog,
    ctx: SchedulerContext,
    account: AccountId,
    root: TempDir,
    state: TempDir,
}

impl Harness {
    fn new(configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        let state = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let builder = ConfigBuilder::new()
            .sync_debounce_ms(200)
            .watcher_resume_grace_ms(0)
            .rename_correlation_window_ms(100)
            .rename_directory_window_ms(300)
            .backoff_initial_secs(1)
            .backoff_max_secs(1)
            .locks_state_dir(state.path().to_path_buf());
        let config: Config = configure(builder).build();

        let engine = Arc::new(ScriptedEngine::new());
        let activity = ActivityLog::in_memory();
        let ctx = SchedulerContext::new(
            Arc::new(config),
            engine.clone(),
            Arc::new(activity.clone()),
        )
        .without_watcher();

        Self {
            engine,
            activity,
            ctx,
            account: AccountId::new(),
            root,
            state,
        }
    }

    fn pairing(&self, mode: PairingMode) -> Pairing {
        Pairing::new(mode, self.root.path(), "gdrive:Docs").unwrap()
    }

    fn spawn(&self, pairing: Pairing) -> SchedulerHandle {
        SyncScheduler::spawn(self.account, pairing, self.ctx.clone())
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    fn records(&self, kind: ActivityKind) -> Vec<ActivityRecord> {
        self.activity
            .query(Some(self.account))
            .into_iter()
            .filter(|r| r.kind() == kind)
            .collect()
    }
}

async fn wait_status(
    handle: &SchedulerHandle,
    what: &str,
    pred: impl Fn(&SchedulerStatus) -> bool,
) -> SchedulerStatus {
    let mut rx = handle.subscribe_status();
    tokio::time::timeout(TIMEOUT, rx.wait_for(|s| pred(s)))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .map(|s| s.clone())
        .expect("scheduler task alive")
}

/// Waits until the first pass after start has completed
async fn wait_initial_pass(handle: &SchedulerHandle) {
    wait_status(handle, "initial pass", |s| {
        s.passes >= 1 && s.state == SchedulerState::Idle
    })
    .await;
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn meta(size: u64) -> Option<Fingerprint> {
    Some(Fingerprint::Meta {
        size,
        mtime: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
    })
}

fn inject(handle: &SchedulerHandle, event: ChangeEvent, fingerprint: Option<Fingerprint>) {
    assert!(handle.feed().submit(RawEvent::new(event, fingerprint)));
}

// ============================================================================
// Renames
// ============================================================================

#[tokio::test]
async fn test_rename_becomes_single_server_side_move() {
    let h = Harness::new(|b| b);
    let handle = h.spawn(h.pairing(PairingMode::Mirror));
    wait_initial_pass(&handle).await;

    let now = Instant::now();
    let from = h.path("report.docx");
    let to = h.path("report_final.docx");
    // What inotify delivers for one rename
    inject(&handle, ChangeEvent::deleted(&from, false, now), meta(4096));
    inject(&handle, ChangeEvent::created(&to, false, now), meta(4096));
    inject(&handle, ChangeEvent::moved(&from, &to, false, now), meta(4096));

    eventually("server-side move", || h.engine.moves().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(
        h.engine.moves(),
        vec![(PathBuf::from("report.docx"), PathBuf::from("report_final.docx"))]
    );
    assert_eq!(h.engine.syncs(), 1, "no pass beyond the initial one");

    let renames = h.records(ActivityKind::Rename);
    assert_eq!(renames.len(), 1);
    assert_eq!(renames[0].path(), "report_final.docx");
    assert_eq!(renames[0].prior_path(), Some("report.docx"));
    assert!(renames[0].outcome().is_success());

    handle.stop().await;
}

#[tokio::test]
async fn test_correlated_delete_create_becomes_move() {
    let h = Harness::new(|b| b);
    let handle = h.spawn(h.pairing(PairingMode::Mirror));
    wait_initial_pass(&handle).await;

    // Cross-directory move reported as an unpaired delete and create
    let now = Instant::now();
    inject(&handle, ChangeEvent::deleted(h.path("a/photo.jpg"), false, now), meta(52_000));
    inject(&handle, ChangeEvent::created(h.path("b/photo.jpg"), false, now), meta(52_000));

    eventually("correlated move", || h.engine.moves().len() == 1).await;
    assert_eq!(
        h.engine.moves()[0],
        (PathBuf::from("a/photo.jpg"), PathBuf::from("b/photo.jpg"))
    );
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.engine.syncs(), 1);

    handle.stop().await;
}

#[tokio::test]
async fn test_directory_move_issues_one_move() {
    let h = Harness::new(|b| b);
    let handle = h.spawn(h.pairing(PairingMode::Mirror));
    wait_initial_pass(&handle).await;

    let now = Instant::now();
    let from = h.path("Projects");
    let to = h.path("Archive/Projects");
    inject(&handle, ChangeEvent::moved(&from, &to, true, now), None);
    for i in 0..20 {
        let name = format!("src/file{i}.rs");
        inject(&handle, ChangeEvent::deleted(from.join(&name), false, now), meta(100 + i));
        inject(&handle, ChangeEvent::created(to.join(&name), false, now), meta(100 + i));
    }

    eventually("directory move", || h.engine.moves().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(
        h.engine.moves(),
        vec![(PathBuf::from("Projects"), PathBuf::from("Archive/Projects"))]
    );
    assert_eq!(h.engine.syncs(), 1, "children must not trigger a pass");

    handle.stop().await;
}

#[tokio::test]
async fn test_real_rename_is_forwarded_as_move() {
    let state = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("report.docx"), b"quarterly numbers").unwrap();

    let config = ConfigBuilder::new()
        .sync_debounce_ms(300)
        .watcher_resume_grace_ms(50)
        .rename_correlation_window_ms(200)
        .rename_directory_window_ms(400)
        .locks_state_dir(state.path().to_path_buf())
        .build();
    let engine = Arc::new(ScriptedEngine::new());
    let activity = ActivityLog::in_memory();
    let ctx = SchedulerContext::new(Arc::new(config), engine.clone(), Arc::new(activity.clone()));
    let pairing = Pairing::new(PairingMode::Mirror, root.path(), "gdrive:Docs").unwrap();
    let handle = SyncScheduler::spawn(AccountId::new(), pairing, ctx);

    wait_initial_pass(&handle).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    std::fs::rename(
        root.path().join("report.docx"),
        root.path().join("report_final.docx"),
    )
    .unwrap();

    eventually("server-side move", || engine.moves().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(800)).await;

    assert_eq!(
        engine.moves(),
        vec![(PathBuf::from("report.docx"), PathBuf::from("report_final.docx"))]
    );
    assert_eq!(engine.syncs(), 1);

    handle.stop().await;
}

// ============================================================================
// Debounce and passes
// ============================================================================

#[tokio::test]
async fn test_burst_of_modifications_runs_one_pass() {
    let h = Harness::new(|b| b.sync_debounce_ms(300));
    let handle = h.spawn(h.pairing(PairingMode::Mirror));
    wait_initial_pass(&handle).await;

    for _ in 0..5 {
        inject(&handle, ChangeEvent::modified(h.path("notes.txt"), Instant::now()), meta(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    wait_status(&handle, "second pass", |s| s.passes >= 2).await;
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(h.engine.syncs(), 2);

    let uploads = h.records(ActivityKind::Upload);
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].path(), "notes.txt");

    handle.stop().await;
}

#[tokio::test]
async fn test_sync_now_runs_a_pass() {
    let h = Harness::new(|b| b);
    let handle = h.spawn(h.pairing(PairingMode::Mirror));
    wait_initial_pass(&handle).await;

    handle.request_sync().unwrap();
    let status = wait_status(&handle, "manual pass", |s| s.passes >= 2).await;
    assert!(status.last_success.is_some());
    assert_eq!(h.engine.syncs(), 2);

    handle.stop().await;
}

#[tokio::test]
async fn test_watcher_is_suspended_during_pass() {
    let h = Harness::new(|b| b);
    h.engine.set_delay(Duration::from_millis(400));
    let handle = h.spawn(h.pairing(PairingMode::Mirror));

    wait_status(&handle, "syncing", |s| s.state == SchedulerState::Syncing).await;
    assert!(handle.feed().suspension.is_suspended());
    assert!(
        !handle
            .feed()
            .submit(RawEvent::new(ChangeEvent::modified(h.path("x"), Instant::now()), None)),
        "events from the pass itself are dropped"
    );

    wait_initial_pass(&handle).await;
    assert_eq!(handle.feed().suspension.holders(), 0);
    assert!(!handle.feed().suspension.is_suspended());

    handle.stop().await;
}

#[tokio::test]
async fn test_change_during_pass_schedules_follow_up_pass() {
    let h = Harness::new(|b| b.watcher_resume_grace_ms(100));
    h.engine.set_delay(Duration::from_millis(300));
    let handle = h.spawn(h.pairing(PairingMode::Mirror));

    wait_status(&handle, "syncing", |s| s.state == SchedulerState::Syncing).await;
    // A user edit landing mid-pass is dropped with the pass's own writes
    assert!(!handle.feed().submit(RawEvent::new(
        ChangeEvent::modified(h.path("notes.txt"), Instant::now()),
        meta(42),
    )));

    let status = wait_status(&handle, "follow-up pass", |s| {
        s.passes >= 2 && s.state == SchedulerState::Idle
    })
    .await;
    assert!(status.last_success.is_some());

    // The follow-up itself saw no edits, so nothing more is scheduled
    h.engine.set_delay(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(h.engine.syncs(), 2);

    handle.stop().await;
}

#[tokio::test]
async fn test_passes_respect_global_concurrency_limit() {
    let h = Harness::new(|b| b.sync_max_concurrent_passes(1));
    h.engine.set_delay(Duration::from_millis(150));

    let other_root = tempfile::tempdir().unwrap();
    let first = h.spawn(h.pairing(PairingMode::Mirror));
    let second = h.spawn(
        Pairing::new(PairingMode::Mirror, other_root.path(), "gdrive:Other").unwrap(),
    );

    wait_initial_pass(&first).await;
    wait_initial_pass(&second).await;
    assert_eq!(h.engine.syncs(), 2);
    assert_eq!(h.engine.max_in_flight.load(Ordering::SeqCst), 1);

    first.stop().await;
    second.stop().await;
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_pass_releases_guard_and_backs_off() {
    let h = Harness::new(|b| b.backoff_initial_secs(30).backoff_max_secs(60));
    h.engine.set_behavior(Behavior::Error);
    let handle = h.spawn(h.pairing(PairingMode::Mirror));

    let status = wait_status(&handle, "backoff", |s| {
        matches!(s.state, SchedulerState::ErrorBackoff { .. })
    })
    .await;
    assert_eq!(
        status.state,
        SchedulerState::ErrorBackoff {
            attempt: 1,
            retry_in: Duration::from_secs(30)
        }
    );
    assert_eq!(status.consecutive_failures, 1);
    assert!(status.last_error.unwrap().contains("engine binary missing"));
    assert_eq!(handle.feed().suspension.holders(), 0);

    let failures = h.records(ActivityKind::Sync);
    assert_eq!(failures.len(), 1);
    assert!(!failures[0].outcome().is_success());

    handle.stop().await;
}

#[tokio::test]
async fn test_partial_failure_retries_after_backoff() {
    let h = Harness::new(|b| b);
    h.engine.queue(Behavior::Partial);
    let handle = h.spawn(h.pairing(PairingMode::Mirror));

    wait_status(&handle, "backoff", |s| {
        matches!(s.state, SchedulerState::ErrorBackoff { .. })
    })
    .await;
    let status = wait_status(&handle, "recovery", |s| {
        s.passes >= 2 && s.state == SchedulerState::Idle && s.consecutive_failures == 0
    })
    .await;
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_error.is_none());

    handle.stop().await;
}

#[tokio::test]
async fn test_retry_ceiling_blocks_until_user_sync() {
    let h = Harness::new(|b| b.backoff_retry_ceiling(2));
    h.engine.set_behavior(Behavior::Fatal);
    let handle = h.spawn(h.pairing(PairingMode::Mirror));

    let status = wait_status(&handle, "blocked", |s| s.state == SchedulerState::Blocked).await;
    assert_eq!(status.consecutive_failures, 2);
    assert_eq!(h.engine.syncs(), 2);

    let errors = h.records(ActivityKind::Error);
    assert_eq!(errors.len(), 1);

    // Blocked pairings ignore automatic triggers
    inject(&handle, ChangeEvent::modified(h.path("notes.txt"), Instant::now()), meta(3));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.engine.syncs(), 2);

    h.engine.set_behavior(Behavior::Succeed);
    handle.request_sync().unwrap();
    let status = wait_status(&handle, "unblocked", |s| {
        s.state == SchedulerState::Idle && s.consecutive_failures == 0
    })
    .await;
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(h.engine.syncs(), 3);

    handle.stop().await;
}

// ============================================================================
// Lock recovery
// ============================================================================

fn age(path: &Path, by: Duration) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - by).unwrap();
}

#[tokio::test]
async fn test_stale_lock_removed_before_pass() {
    let h = Harness::new(|b| b.locks_stale_after(300));
    let pairing = h.pairing(PairingMode::Mirror);
    let lock = h
        .state
        .path()
        .join(format!("{}.lck", session_stem(&pairing)));
    std::fs::write(&lock, "").unwrap();
    age(&lock, Duration::from_secs(600));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let observed = seen.clone();
    let lock_file = lock.clone();
    h.engine
        .on_sync(move |_| observed.lock().unwrap().push(lock_file.exists()));

    let handle = h.spawn(pairing);
    wait_initial_pass(&handle).await;

    assert_eq!(*seen.lock().unwrap(), vec![false]);
    let recovered = h.records(ActivityKind::LockRecovered);
    assert_eq!(recovered.len(), 1);
    assert!(recovered[0].path().ends_with(".lck"));

    handle.stop().await;
}

#[tokio::test]
async fn test_fresh_lock_without_pid_is_kept() {
    let h = Harness::new(|b| b.locks_stale_after(300));
    let pairing = h.pairing(PairingMode::Mirror);
    let lock = h
        .state
        .path()
        .join(format!("{}.lck", session_stem(&pairing)));
    std::fs::write(&lock, "").unwrap();

    let outcome =
        SyncScheduler::run_once(h.account, &pairing, &h.ctx, &CancellationToken::new()).await;

    assert_eq!(outcome, PassOutcome::Success { actions: 1 });
    assert!(lock.exists());
    assert!(h.records(ActivityKind::LockRecovered).is_empty());
}

#[tokio::test]
async fn test_run_once_records_failure() {
    let h = Harness::new(|b| b);
    h.engine.set_behavior(Behavior::Fatal);
    let pairing = h.pairing(PairingMode::Mirror);

    let outcome =
        SyncScheduler::run_once(h.account, &pairing, &h.ctx, &CancellationToken::new()).await;

    assert_eq!(outcome, PassOutcome::Fatal("remote not found".into()));
    let failures = h.records(ActivityKind::Sync);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].pairing_id(), Some(pairing.id()));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_stop_during_pass_releases_resources() {
    let h = Harness::new(|b| b.sync_stop_grace(1));
    h.engine.set_delay(Duration::from_secs(30));
    let handle = h.spawn(h.pairing(PairingMode::Mirror));
    wait_status(&handle, "syncing", |s| s.state == SchedulerState::Syncing).await;

    let feed = handle.feed().clone();
    let mut status = handle.subscribe_status();
    let started = Instant::now();
    handle.stop().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(feed.suspension.holders(), 0);
    assert_eq!(status.borrow_and_update().state, SchedulerState::Stopped);
    assert_eq!(h.engine.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(h.ctx.permits.available_permits(), h.ctx.config.sync.max_concurrent_passes);
}

#[tokio::test]
async fn test_watch_lost_suspends_until_resubscribe() {
    let h = Harness::new(|b| b);
    let handle = h.spawn(h.pairing(PairingMode::Mirror));
    wait_initial_pass(&handle).await;

    handle.feed().buffer.mark_lost("watched root was removed or moved");
    let status = wait_status(&handle, "watch lost", |s| s.state == SchedulerState::WatchLost).await;
    assert!(status.last_error.unwrap().contains("removed"));
    assert_eq!(h.records(ActivityKind::WatchLost).len(), 1);

    // Events and polling are ignored while lost
    inject(&handle, ChangeEvent::modified(h.path("a.txt"), Instant::now()), meta(1));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.engine.syncs(), 1);

    handle.resubscribe().unwrap();
    wait_status(&handle, "resubscribed pass", |s| {
        s.passes >= 2 && s.state == SchedulerState::Idle
    })
    .await;
    assert_eq!(h.engine.syncs(), 2);

    handle.stop().await;
}

#[tokio::test]
async fn test_stream_pairing_mounts_and_unmounts() {
    let h = Harness::new(|b| b);
    let handle = h.spawn(h.pairing(PairingMode::Stream));

    wait_status(&handle, "mounted", |s| s.state == SchedulerState::Mounted).await;
    assert_eq!(h.engine.mounts.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.syncs(), 0, "stream pairings never run passes");

    handle.stop().await;
    assert_eq!(h.engine.unmounts.load(Ordering::SeqCst), 1);
    assert_eq!(h.records(ActivityKind::Mount).len(), 1);
    assert_eq!(h.records(ActivityKind::Unmount).len(), 1);
}
