//! File watching and the bounded event buffer
//!
//! Provides a [`FileWatcher`] that wraps the `notify` crate to monitor a
//! pairing's local root recursively, converting raw OS events into
//! [`ChangeEvent`] values.
//!
//! The notify callback runs on notify's own thread and must never block on
//! the scheduler. It filters temporary files, updates the fingerprint index,
//! and pushes into a [`WatchBuffer`]: a bounded queue with a documented
//! overflow policy and an out-of-band subscription-lost flag.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue
//!       │
//!       ▼
//!  FileWatcher ──→ EventProducer ──→ WatchBuffer ──→ SyncScheduler
//!                    │   │                (drain)
//!          TempFileFilter  FingerprintIndex
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use lxmirror_core::domain::{ChangeEvent, ChangeKind};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::filter::TempFileFilter;
use crate::fingerprint::{Fingerprint, FingerprintIndex, Fingerprinter};
use crate::suspension::WatcherSuspension;

/// A filtered change event plus the fingerprint the disambiguator needs
///
/// For deletes the fingerprint is the last one known before the path vanished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event: ChangeEvent,
    pub fingerprint: Option<Fingerprint>,
}

impl RawEvent {
    pub fn new(event: ChangeEvent, fingerprint: Option<Fingerprint>) -> Self {
        Self { event, fingerprint }
    }
}

// ============================================================================
// WatchBuffer
// ============================================================================

/// Everything taken out of the buffer in one drain
#[derive(Debug, Default)]
pub struct Drained {
    pub events: Vec<RawEvent>,
    /// Events were discarded without a newer duplicate; a full pass is needed
    pub overflowed: bool,
    /// The subscription died; carries the reason
    pub lost: Option<String>,
    /// Events were dropped while the pairing was suspended
    pub suppressed: bool,
}

#[derive(Debug, Default)]
struct BufferState {
    events: VecDeque<RawEvent>,
    overflowed: bool,
    lost: Option<String>,
    suppressed: bool,
}

/// Bounded single-producer buffer between the notify thread and a scheduler
///
/// Overflow policy, applied when a push finds the buffer full:
/// 1. drop the oldest event whose path appears again later in the buffer
///    (the later event supersedes it);
/// 2. otherwise drop the oldest event and raise the `overflowed` flag, which
///    makes the scheduler run a full pass.
///
/// The subscription-lost signal is stored outside the queue and is never
/// dropped. The same goes for the suppressed flag, raised when the feed drops
/// an event during a suspension; it outlives [`WatchBuffer::discard_events`]
/// so the scheduler can follow a pass with another one.
#[derive(Debug)]
pub struct WatchBuffer {
    state: Mutex<BufferState>,
    ready: Notify,
    capacity: usize,
}

impl WatchBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            ready: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event, applying the overflow policy when full
    ///
    /// Returns false if an event had to be discarded.
    pub fn push(&self, event: RawEvent) -> bool {
        let mut clean = true;
        {
            let mut state = self.lock();
            if state.events.len() >= self.capacity {
                clean = false;
                match oldest_superseded(&state.events, &event) {
                    Some(index) => {
                        state.events.remove(index);
                    }
                    None => {
                        state.events.pop_front();
                        if !state.overflowed {
                            warn!(capacity = self.capacity, "Watch buffer overflowed");
                        }
                        state.overflowed = true;
                    }
                }
            }
            state.events.push_back(event);
        }
        self.ready.notify_one();
        clean
    }

    /// Forces the next pass to be a full one (e.g. the OS asked for a rescan)
    pub fn mark_overflow(&self) {
        self.lock().overflowed = true;
        self.ready.notify_one();
    }

    /// Records that the subscription is gone
    pub fn mark_lost(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut state = self.lock();
            if state.lost.is_none() {
                state.lost = Some(reason);
            }
        }
        self.ready.notify_one();
    }

    /// Records that an event was dropped during a suspension
    pub fn mark_suppressed(&self) {
        self.lock().suppressed = true;
        self.ready.notify_one();
    }

    /// Clears the suppressed flag, returning its previous value
    pub fn take_suppressed(&self) -> bool {
        std::mem::take(&mut self.lock().suppressed)
    }

    /// Takes all buffered events and flags
    pub fn drain(&self) -> Drained {
        let mut state = self.lock();
        Drained {
            events: state.events.drain(..).collect(),
            overflowed: std::mem::take(&mut state.overflowed),
            lost: state.lost.take(),
            suppressed: std::mem::take(&mut state.suppressed),
        }
    }

    /// Discards queued events but keeps the lost and suppressed flags
    pub fn discard_events(&self) -> usize {
        let mut state = self.lock();
        state.overflowed = false;
        let n = state.events.len();
        state.events.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once something was pushed or flagged since the last wait
    pub async fn ready(&self) {
        self.ready.notified().await;
    }
}

/// Finds the oldest buffered event superseded by a later one (or the incoming one)
fn oldest_superseded(events: &VecDeque<RawEvent>, incoming: &RawEvent) -> Option<usize> {
    let mut counts: HashMap<&Path, usize> = HashMap::new();
    for raw in events {
        *counts.entry(raw.event.path.as_path()).or_default() += 1;
    }
    *counts.entry(incoming.event.path.as_path()).or_default() += 1;
    // Moves carry two paths; never drop one, its source would be lost
    events
        .iter()
        .position(|raw| !raw.event.is_move() && counts[raw.event.path.as_path()] > 1)
}

// ============================================================================
// WatchFeed
// ============================================================================

/// The pieces a scheduler and its watcher share
#[derive(Debug, Clone)]
pub struct WatchFeed {
    pub buffer: Arc<WatchBuffer>,
    pub suspension: WatcherSuspension,
}

impl WatchFeed {
    pub fn new(capacity: usize, resume_grace: std::time::Duration) -> Self {
        Self {
            buffer: Arc::new(WatchBuffer::new(capacity)),
            suspension: WatcherSuspension::new(resume_grace),
        }
    }

    /// Pushes an event unless the pairing is suspended
    ///
    /// Returns false if the event was dropped because of the suspension;
    /// the drop is remembered on the buffer.
    pub fn submit(&self, event: RawEvent) -> bool {
        if self.suspension.is_suspended() {
            trace!(path = %event.event.path.display(), "Suspended, dropping event");
            self.buffer.mark_suppressed();
            return false;
        }
        self.buffer.push(event);
        true
    }
}

// ============================================================================
// EventProducer - runs on the notify thread
// ============================================================================

/// Turns notify callbacks into buffered [`RawEvent`]s
pub struct EventProducer {
    root: PathBuf,
    filter: TempFileFilter,
    fingerprinter: Fingerprinter,
    index: FingerprintIndex,
    feed: WatchFeed,
}

impl EventProducer {
    pub fn new(
        root: PathBuf,
        filter: TempFileFilter,
        fingerprinter: Fingerprinter,
        index: FingerprintIndex,
        feed: WatchFeed,
    ) -> Self {
        Self {
            filter: filter.rooted(&root),
            root,
            fingerprinter,
            index,
            feed,
        }
    }

    pub fn handle(&mut self, res: std::result::Result<notify::Event, notify::Error>) {
        match res {
            Ok(event) => self.handle_event(&event),
            Err(err) => self.handle_error(&err),
        }
    }

    fn handle_event(&mut self, event: &notify::Event) {
        if event.need_rescan() {
            warn!(root = %self.root.display(), "Watcher requested a rescan");
            self.feed.buffer.mark_overflow();
            return;
        }
        if self.root_vanished(event) {
            self.feed
                .buffer
                .mark_lost(format!("watched root {} was removed or moved", self.root.display()));
            return;
        }

        let Some(change) = map_notify_event(event, Instant::now()) else {
            return;
        };
        let change = self.refine(change);
        let Some(change) = self.filter.apply(change) else {
            return;
        };
        // The index tracks even suspended events so it matches the tree after a pass
        let fingerprint = self.track(&change);
        self.feed.submit(RawEvent::new(change, fingerprint));
    }

    fn handle_error(&mut self, err: &notify::Error) {
        let root_affected = err.paths.is_empty() || err.paths.iter().any(|p| p == &self.root);
        match &err.kind {
            notify::ErrorKind::MaxFilesWatch => {
                self.feed.buffer.mark_lost("inotify watch limit reached");
            }
            notify::ErrorKind::PathNotFound | notify::ErrorKind::WatchNotFound if root_affected => {
                self.feed.buffer.mark_lost(format!("watch invalidated: {err}"));
            }
            _ => warn!(error = %err, "File watcher error"),
        }
    }

    fn root_vanished(&self, event: &notify::Event) -> bool {
        let touches_root = event.paths.iter().any(|p| p == &self.root);
        touches_root
            && match event.kind {
                EventKind::Remove(_) => true,
                EventKind::Modify(ModifyKind::Name(RenameMode::From)) => true,
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                    event.paths.first() == Some(&self.root)
                }
                _ => false,
            }
    }

    /// Fills in `is_dir` for deletes, which the OS may not report
    fn refine(&self, mut change: ChangeEvent) -> ChangeEvent {
        if matches!(change.kind, ChangeKind::Deleted) && !change.is_dir {
            change.is_dir = self.index.is_dir(&change.path);
        }
        change
    }

    fn track(&mut self, change: &ChangeEvent) -> Option<Fingerprint> {
        match &change.kind {
            ChangeKind::Created | ChangeKind::Modified => {
                if change.is_dir {
                    self.index.insert_dir(change.path.clone());
                    return None;
                }
                let fp = self.fingerprinter.compute(&change.path)?;
                self.index.insert(change.path.clone(), fp);
                Some(fp)
            }
            ChangeKind::Deleted => self.index.remove(&change.path),
            ChangeKind::Moved { from } => match self.index.rename(from, &change.path) {
                Some(fp) => Some(fp),
                None if change.is_dir => None,
                None => {
                    let fp = self.fingerprinter.compute(&change.path)?;
                    self.index.insert(change.path.clone(), fp);
                    Some(fp)
                }
            },
        }
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Recursive OS watch on one pairing's local root
///
/// Dropping the watcher ends the subscription.
///
/// ## Usage
///
/// ```ignore
/// let feed = WatchFeed::new(4096, Duration::from_millis(500));
/// let watcher = FileWatcher::start(root, &feed, TempFileFilter::new(), Fingerprinter::default())?;
/// // feed.buffer.ready().await; feed.buffer.drain()
/// drop(watcher); // stops watching
/// ```
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Seeds the fingerprint index and subscribes to `root`
    ///
    /// Scans the whole tree, so call it off the async executor.
    ///
    /// # Errors
    /// Returns an error if the root does not exist or cannot be watched
    /// (missing permissions, inotify watch limit reached).
    pub fn start(
        root: &Path,
        feed: &WatchFeed,
        filter: TempFileFilter,
        fingerprinter: Fingerprinter,
    ) -> Result<Self> {
        if !root.is_dir() {
            anyhow::bail!("watch root {} is not a directory", root.display());
        }
        info!(path = %root.display(), "Starting recursive watch");

        let index = FingerprintIndex::scan(root, &fingerprinter);
        let mut producer =
            EventProducer::new(root.to_path_buf(), filter, fingerprinter, index, feed.clone());

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| producer.handle(res),
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", root.display()))?;

        Ok(Self {
            watcher,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.watcher.unwatch(&self.root) {
            debug!(path = %self.root.display(), error = %e, "Unwatch on drop failed");
        }
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher").field("root", &self.root).finish()
    }
}

// ============================================================================
// Event mapping - notify::Event → ChangeEvent
// ============================================================================

/// Converts a `notify::Event` into a [`ChangeEvent`]
///
/// Maps the notify event kinds as follows:
/// - `Create(*)` -> `Created`
/// - `Modify(Name(Both))` with 2 paths -> `Moved`
/// - `Modify(Name(From))` -> `Deleted` (source half of a move)
/// - `Modify(Name(To))` -> `Created` (destination half of a move)
/// - `Modify(Name(Any))` -> `Created` or `Deleted` depending on existence
/// - `Remove(*)` -> `Deleted`
/// - Other `Modify(*)` -> `Modified`
///
/// Backends that report both halves and the paired move produce a
/// delete+create pair plus a native move; the disambiguator collapses them.
///
/// Returns `None` for events without paths and for access events.
fn map_notify_event(event: &notify::Event, at: Instant) -> Option<ChangeEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(kind) => {
            let path = paths.first()?;
            let is_dir = match kind {
                CreateKind::Folder => true,
                CreateKind::File => false,
                _ => path.is_dir(),
            };
            trace!(path = %path.display(), is_dir, "Mapped Create event");
            Some(ChangeEvent::created(path.clone(), is_dir, at))
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                let from = paths[0].clone();
                let to = paths[1].clone();
                let is_dir = to.is_dir();
                trace!(from = %from.display(), to = %to.display(), "Mapped Rename event");
                Some(ChangeEvent::moved(from, to, is_dir, at))
            } else {
                let path = paths.first()?;
                trace!(path = %path.display(), "Rename with single path, treating as Modified");
                Some(ChangeEvent::modified(path.clone(), at))
            }
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            let path = paths.first()?;
            Some(ChangeEvent::deleted(path.clone(), false, at))
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            let path = paths.first()?;
            Some(ChangeEvent::created(path.clone(), path.is_dir(), at))
        }

        EventKind::Modify(ModifyKind::Name(_)) => {
            let path = paths.first()?;
            if path.exists() {
                Some(ChangeEvent::created(path.clone(), path.is_dir(), at))
            } else {
                Some(ChangeEvent::deleted(path.clone(), false, at))
            }
        }

        EventKind::Remove(kind) => {
            let path = paths.first()?;
            let is_dir = matches!(kind, RemoveKind::Folder);
            trace!(path = %path.display(), is_dir, "Mapped Remove event");
            Some(ChangeEvent::deleted(path.clone(), is_dir, at))
        }

        EventKind::Modify(_) => {
            let path = paths.first()?;
            if path.is_dir() {
                // Directory metadata churn carries no content change
                return None;
            }
            Some(ChangeEvent::modified(path.clone(), at))
        }

        _ => None,
    }
}

// ============================================================================
// Unit tests
// ============================================================================
