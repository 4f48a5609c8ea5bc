//! Rename/move disambiguation
//!
//! Collapses the two ways a move shows up in a raw event stream into a single
//! `Moved` [`ChangeEvent`]:
//!
//! - a native rename notification (A → B in one event), forwarded immediately;
//! - a `Deleted(A)` followed within the correlation window by a `Created(B)`
//!   with an equal, non-empty [`Fingerprint`].
//!
//! The disambiguator is a pure state machine over a small pending table. The
//! scheduler feeds it with [`Disambiguator::push`] and calls
//! [`Disambiguator::sweep`] when [`Disambiguator::next_deadline`] passes.
//!
//! ## Rules
//!
//! - Deletes and creates are held until `at + window`. Unmatched ones are
//!   then emitted as independent `Deleted`/`Created` events.
//! - A correlated pair is also held until the delete's deadline, so a native
//!   move for the same transition arriving later still wins and the pair is
//!   discarded.
//! - A native move removes pending deletes/creates for its endpoints and
//!   swallows stragglers for them for one window.
//! - A directory move suppresses events for children beneath either end for
//!   the directory window; only the directory move is forwarded.
//! - `Deleted` then `Created` of the same path (atomic save) collapses into
//!   `Modified`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lxmirror_core::config::RenameConfig;
use lxmirror_core::domain::{ChangeEvent, ChangeKind};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::fingerprint::Fingerprint;
use crate::watcher::RawEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingKind {
    Delete,
    Create,
    /// Correlated delete+create; `path` is the destination
    Matched { from: PathBuf },
}

#[derive(Debug, Clone)]
struct Pending {
    kind: PendingKind,
    path: PathBuf,
    is_dir: bool,
    fingerprint: Option<Fingerprint>,
    at: Instant,
    expires: Instant,
}

impl Pending {
    fn into_event(self) -> ChangeEvent {
        match self.kind {
            PendingKind::Delete => ChangeEvent::deleted(self.path, self.is_dir, self.at),
            PendingKind::Create => ChangeEvent::created(self.path, self.is_dir, self.at),
            PendingKind::Matched { from } => ChangeEvent::moved(from, self.path, self.is_dir, self.at),
        }
    }

    fn correlates_with(&self, fingerprint: Option<Fingerprint>) -> bool {
        match (self.fingerprint, fingerprint) {
            (Some(a), Some(b)) => !self.is_dir && a.is_distinctive() && a == b,
            _ => false,
        }
    }
}

/// A native move whose endpoints absorb late delete/create halves
#[derive(Debug, Clone)]
struct RecentMove {
    from: PathBuf,
    to: PathBuf,
    until: Instant,
}

/// Timed-window matcher turning raw events into logical change events
#[derive(Debug)]
pub struct Disambiguator {
    window: Duration,
    dir_window: Duration,
    pending: Vec<Pending>,
    recent_moves: Vec<RecentMove>,
    moved_dirs: Vec<RecentMove>,
}

impl Disambiguator {
    pub fn new(window: Duration, dir_window: Duration) -> Self {
        Self {
            window,
            dir_window: dir_window.max(window),
            pending: Vec::new(),
            recent_moves: Vec::new(),
            moved_dirs: Vec::new(),
        }
    }

    pub fn from_config(config: &RenameConfig) -> Self {
        Self::new(config.correlation_window(), config.directory_window())
    }

    /// Feeds one raw event; returns events ready to be acted on right away
    pub fn push(&mut self, raw: RawEvent, now: Instant) -> Vec<ChangeEvent> {
        self.expire_memory(now);
        let RawEvent { event, fingerprint } = raw;

        if self.is_suppressed_child(&event) {
            trace!(path = %event.path.display(), "Suppressed child of moved directory");
            return Vec::new();
        }

        match event.kind.clone() {
            ChangeKind::Moved { from } => self.on_native_move(event, from, now),
            ChangeKind::Deleted => {
                self.on_delete(event, fingerprint);
                Vec::new()
            }
            ChangeKind::Created => self.on_create(event, fingerprint),
            ChangeKind::Modified => self.on_modify(event, fingerprint),
        }
    }

    /// Emits everything whose window has expired, oldest first
    pub fn sweep(&mut self, now: Instant) -> Vec<ChangeEvent> {
        self.expire_memory(now);
        let (mut due, keep): (Vec<Pending>, Vec<Pending>) =
            self.pending.drain(..).partition(|p| p.expires <= now);
        self.pending = keep;
        due.sort_by_key(|p| p.at);

        due.into_iter()
            .map(|p| {
                if matches!(p.kind, PendingKind::Matched { .. }) {
                    debug!(to = %p.path.display(), "Correlated delete+create into a move");
                } else {
                    trace!(path = %p.path.display(), kind = ?p.kind, "No correlation, forwarding");
                }
                p.into_event()
            })
            .collect()
    }

    /// Earliest instant at which [`sweep`](Self::sweep) has something to emit
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.expires).min()
    }

    /// Number of held entries (a correlated pair counts once)
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Forgets all held state; a full pass makes it irrelevant
    pub fn clear(&mut self) {
        self.pending.clear();
        self.recent_moves.clear();
        self.moved_dirs.clear();
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    fn on_native_move(&mut self, event: ChangeEvent, from: PathBuf, now: Instant) -> Vec<ChangeEvent> {
        let to = event.path.clone();

        let before = self.pending.len();
        self.pending.retain(|p| match &p.kind {
            PendingKind::Delete => p.path != from,
            PendingKind::Create => p.path != to,
            PendingKind::Matched { from: f } => *f != from && p.path != to,
        });
        if event.is_dir {
            self.pending.retain(|p| {
                let under = |dir: &Path| p.path.starts_with(dir);
                let from_under = match &p.kind {
                    PendingKind::Matched { from: f } => f.starts_with(&from) || f.starts_with(&to),
                    _ => false,
                };
                !(under(&from) || under(&to) || from_under)
            });
            self.moved_dirs.push(RecentMove {
                from: from.clone(),
                to: to.clone(),
                until: now + self.dir_window,
            });
        }
        if self.pending.len() != before {
            debug!(
                from = %from.display(),
                to = %to.display(),
                discarded = before - self.pending.len(),
                "Native move supersedes pending delete/create"
            );
        }

        self.recent_moves.push(RecentMove {
            from,
            to,
            until: now + self.window,
        });
        vec![event]
    }

    fn on_delete(&mut self, event: ChangeEvent, fingerprint: Option<Fingerprint>) {
        if self.recent_moves.iter().any(|m| m.from == event.path) {
            trace!(path = %event.path.display(), "Delete half of a native move");
            return;
        }

        // A pending create for the same path never existed remotely
        if let Some(i) = self
            .pending
            .iter()
            .position(|p| p.kind == PendingKind::Create && p.path == event.path)
        {
            self.pending.remove(i);
            return;
        }
        // The destination of a correlated pair vanished: only the source delete remains
        if let Some(p) = self
            .pending
            .iter_mut()
            .find(|p| matches!(p.kind, PendingKind::Matched { .. }) && p.path == event.path)
        {
            if let PendingKind::Matched { from } = std::mem::replace(&mut p.kind, PendingKind::Delete) {
                p.path = from;
            }
            return;
        }

        // Create seen before its delete
        if let Some(p) = self
            .pending
            .iter_mut()
            .find(|p| p.kind == PendingKind::Create && p.correlates_with(fingerprint))
        {
            p.kind = PendingKind::Matched {
                from: event.path.clone(),
            };
            p.at = p.at.min(event.at);
            return;
        }

        self.pending.push(Pending {
            kind: PendingKind::Delete,
            path: event.path,
            is_dir: event.is_dir,
            fingerprint,
            at: event.at,
            expires: event.at + self.window,
        });
    }

    fn on_create(&mut self, event: ChangeEvent, fingerprint: Option<Fingerprint>) -> Vec<ChangeEvent> {
        if self.recent_moves.iter().any(|m| m.to == event.path) {
            trace!(path = %event.path.display(), "Create half of a native move");
            return Vec::new();
        }

        if let Some(i) = self
            .pending
            .iter()
            .position(|p| p.kind == PendingKind::Delete && p.path == event.path && p.is_dir == event.is_dir)
        {
            self.pending.remove(i);
            trace!(path = %event.path.display(), "Delete+create of one path, treating as modify");
            if event.is_dir {
                return Vec::new();
            }
            return vec![ChangeEvent::modified(event.path, event.at)];
        }

        let mut pending = Pending {
            kind: PendingKind::Create,
            path: event.path,
            is_dir: event.is_dir,
            fingerprint,
            at: event.at,
            expires: event.at + self.window,
        };
        self.try_correlate(&mut pending);
        self.pending.push(pending);
        Vec::new()
    }

    fn on_modify(&mut self, event: ChangeEvent, fingerprint: Option<Fingerprint>) -> Vec<ChangeEvent> {
        let held = self
            .pending
            .iter()
            .position(|p| p.kind == PendingKind::Create && p.path == event.path);
        match held {
            Some(i) => {
                // Still being written; refresh the fingerprint and retry correlation
                let mut pending = self.pending.remove(i);
                if fingerprint.is_some() {
                    pending.fingerprint = fingerprint;
                }
                self.try_correlate(&mut pending);
                self.pending.push(pending);
                Vec::new()
            }
            None => vec![event],
        }
    }

    /// Pairs an unmatched create with the oldest unmatched delete of equal content
    fn try_correlate(&mut self, create: &mut Pending) {
        let candidate = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind == PendingKind::Delete && p.correlates_with(create.fingerprint))
            .min_by_key(|(_, p)| p.at)
            .map(|(i, _)| i);

        if let Some(i) = candidate {
            let delete = self.pending.remove(i);
            create.kind = PendingKind::Matched { from: delete.path };
            create.at = delete.at;
            create.expires = delete.expires;
        }
    }

    // ------------------------------------------------------------------
    // Directory-move suppression
    // ------------------------------------------------------------------

    fn is_suppressed_child(&self, event: &ChangeEvent) -> bool {
        self.moved_dirs.iter().any(|dir| {
            let strictly_under = |path: &Path, root: &Path| path != root && path.starts_with(root);
            match &event.kind {
                ChangeKind::Deleted => strictly_under(&event.path, &dir.from),
                ChangeKind::Created => strictly_under(&event.path, &dir.to),
                ChangeKind::Moved { from } => {
                    match (from.strip_prefix(&dir.from), event.path.strip_prefix(&dir.to)) {
                        (Ok(a), Ok(b)) => !a.as_os_str().is_empty() && a == b,
                        _ => false,
                    }
                }
                // Content edits in the moved tree still need a pass
                ChangeKind::Modified => false,
            }
        })
    }

    fn expire_memory(&mut self, now: Instant) {
        self.recent_moves.retain(|m| m.until > now);
        self.moved_dirs.retain(|m| m.until > now);
    }
}
