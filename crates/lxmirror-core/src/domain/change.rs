//! Logical filesystem change events
//!
//! A [`ChangeEvent`] is what the watcher pipeline hands to a scheduler after
//! temporary-file filtering and rename disambiguation. It is transient and
//! never persisted, so the timestamp is a monotonic [`Instant`].

use std::path::{Path, PathBuf};

use tokio::time::Instant;

/// What happened to a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    /// Renamed or moved; the event path is the destination
    Moved {
        /// Path before the move
        from: PathBuf,
    },
}

/// A logical filesystem occurrence under a pairing's local root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub is_dir: bool,
    pub at: Instant,
}

impl ChangeEvent {
    pub fn created(path: impl Into<PathBuf>, is_dir: bool, at: Instant) -> Self {
        Self {
            kind: ChangeKind::Created,
            path: path.into(),
            is_dir,
            at,
        }
    }

    pub fn modified(path: impl Into<PathBuf>, at: Instant) -> Self {
        Self {
            kind: ChangeKind::Modified,
            path: path.into(),
            is_dir: false,
            at,
        }
    }

    pub fn deleted(path: impl Into<PathBuf>, is_dir: bool, at: Instant) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            path: path.into(),
            is_dir,
            at,
        }
    }

    pub fn moved(
        from: impl Into<PathBuf>,
        to: impl Into<PathBuf>,
        is_dir: bool,
        at: Instant,
    ) -> Self {
        Self {
            kind: ChangeKind::Moved { from: from.into() },
            path: to.into(),
            is_dir,
            at,
        }
    }

    /// Returns the source path for moves
    pub fn prior_path(&self) -> Option<&Path> {
        match &self.kind {
            ChangeKind::Moved { from } => Some(from),
            _ => None,
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self.kind, ChangeKind::Moved { .. })
    }

    /// Returns true if the event touches `dir` or anything beneath it
    pub fn touches(&self, dir: &Path) -> bool {
        self.path.starts_with(dir) || self.prior_path().is_some_and(|p| p.starts_with(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moved_prior_path() {
        let now = Instant::now();
        let event = ChangeEvent::moved("/r/a.txt", "/r/b.txt", false, now);
        assert!(event.is_move());
        assert_eq!(event.prior_path(), Some(Path::new("/r/a.txt")));
        assert_eq!(event.path, PathBuf::from("/r/b.txt"));
    }

    #[test]
    fn test_non_move_has_no_prior() {
        let event = ChangeEvent::created("/r/a.txt", false, Instant::now());
        assert!(!event.is_move());
        assert!(event.prior_path().is_none());
    }

    #[test]
    fn test_touches_either_side_of_move() {
        let event = ChangeEvent::moved("/r/old/x", "/r/new/x", false, Instant::now());
        assert!(event.touches(Path::new("/r/old")));
        assert!(event.touches(Path::new("/r/new")));
        assert!(!event.touches(Path::new("/r/other")));
    }
}
