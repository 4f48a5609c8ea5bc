//! Stale lock artifact recovery
//!
//! `rclone bisync` drops a `<path1>..<path2>.lck` file in its state directory
//! for the duration of a run. A crashed or killed run leaves it behind, and
//! every later run for the same pair then refuses to start. [`LockRecovery`]
//! finds the artifacts belonging to one pairing and removes only those it can
//! confirm are stale.
//!
//! Staleness is decided in this order:
//! 1. a pass for the same session is registered as running in this process → live
//! 2. the artifact records a PID: process alive → live, process gone → stale
//! 3. no PID: older than `stale_after` → stale, otherwise fresh and kept

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use lxmirror_core::config::LocksConfig;
use lxmirror_core::domain::Pairing;
use tracing::{debug, info, warn};

use crate::SyncError;

// ============================================================================
// PassRegistry
// ============================================================================

/// Sessions with a transfer pass currently running in this process
#[derive(Debug, Clone, Default)]
pub struct PassRegistry {
    active: Arc<DashMap<String, usize>>,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `stem` as running until the ticket is dropped
    #[must_use = "the session is unregistered when the ticket is dropped"]
    pub fn register(&self, stem: impl Into<String>) -> PassTicket {
        let stem = stem.into();
        *self.active.entry(stem.clone()).or_insert(0) += 1;
        PassTicket {
            active: Arc::clone(&self.active),
            stem,
        }
    }

    pub fn is_active(&self, stem: &str) -> bool {
        self.active.get(stem).is_some_and(|n| *n > 0)
    }
}

/// RAII registration of one running pass
#[derive(Debug)]
pub struct PassTicket {
    active: Arc<DashMap<String, usize>>,
    stem: String,
}

impl Drop for PassTicket {
    fn drop(&mut self) {
        if let Some(mut count) = self.active.get_mut(&self.stem) {
            *count = count.saturating_sub(1);
        }
        self.active.remove_if(&self.stem, |_, count| *count == 0);
    }
}

// ============================================================================
// Session naming
// ============================================================================

/// rclone's canonical form of one side of a bisync pair
fn canonical_side(side: &str) -> String {
    let trimmed = side.trim_end_matches(['/', '\\']);
    let replaced: String = trimmed
        .chars()
        .map(|c| match c {
            c if c.is_whitespace() => '_',
            '\\' | '/' | ':' | '?' | '*' => '_',
            c => c,
        })
        .collect();
    replaced.trim_start_matches('_').to_string()
}

/// The `path1..path2` stem rclone uses for a pairing's state files
pub fn session_stem(pairing: &Pairing) -> String {
    format!(
        "{}..{}",
        canonical_side(&pairing.local_root().to_string_lossy()),
        canonical_side(pairing.remote_root())
    )
}

// ============================================================================
// LockRecovery
// ============================================================================

/// Outcome of one recovery run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Stale artifacts that were deleted
    pub removed: Vec<PathBuf>,
    /// Artifacts left in place because they may belong to a live pass
    pub kept: Vec<PathBuf>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.removed.is_empty() && self.kept.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Live(&'static str),
    Stale(&'static str),
}

/// Finds and reclaims stale lock artifacts for a pairing
#[derive(Debug, Clone)]
pub struct LockRecovery {
    state_dir: PathBuf,
    extension: String,
    stale_after: Duration,
    registry: PassRegistry,
}

impl LockRecovery {
    pub fn new(
        state_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        stale_after: Duration,
        registry: PassRegistry,
    ) -> Self {
        Self {
            state_dir: state_dir.into(),
            extension: extension.into(),
            stale_after,
            registry,
        }
    }

    pub fn from_config(config: &LocksConfig, registry: PassRegistry) -> Self {
        Self::new(
            config.state_dir.clone(),
            config.extension.clone(),
            config.stale_after(),
            registry,
        )
    }

    pub fn registry(&self) -> &PassRegistry {
        &self.registry
    }

    /// Lists the artifacts that belong to `pairing`
    ///
    /// Only `<stem>.<extension>` matches; a pairing whose stem contains this
    /// one as a substring owns its own artifact.
    pub fn artifacts(&self, pairing: &Pairing) -> Result<Vec<PathBuf>, SyncError> {
        let file_name = format!("{}.{}", session_stem(pairing), self.extension);
        let entries = match fs::read_dir(&self.state_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name == file_name);
            if matches && path.is_file() {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    /// Removes the pairing's stale artifacts; never touches one that may be live
    ///
    /// Does blocking file I/O; async callers go through `spawn_blocking`.
    pub fn recover(&self, pairing: &Pairing) -> Result<RecoveryReport, SyncError> {
        let stem = session_stem(pairing);
        let mut report = RecoveryReport::default();

        for path in self.artifacts(pairing)? {
            match self.judge(&stem, &path) {
                Verdict::Live(reason) => {
                    debug!(path = %path.display(), reason, "Keeping lock artifact");
                    report.kept.push(path);
                }
                Verdict::Stale(reason) => match fs::remove_file(&path) {
                    Ok(()) => {
                        info!(path = %path.display(), reason, "Removed stale lock artifact");
                        report.removed.push(path);
                    }
                    // Its owner finished between the check and the removal
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Cannot remove stale lock artifact");
                        report.kept.push(path);
                    }
                },
            }
        }
        Ok(report)
    }

    fn judge(&self, stem: &str, path: &Path) -> Verdict {
        if self.registry.is_active(stem) {
            return Verdict::Live("pass running in this process");
        }

        match fs::read_to_string(path).ok().as_deref().and_then(parse_pid) {
            Some(pid) if process_alive(pid) => Verdict::Live("owner process alive"),
            Some(_) => Verdict::Stale("owner process gone"),
            None => {
                let age = fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
                    .unwrap_or(Duration::ZERO);
                if age > self.stale_after {
                    Verdict::Stale("older than threshold")
                } else {
                    Verdict::Live("fresh, owner unknown")
                }
            }
        }
    }
}

/// Reads the owning PID from rclone's JSON lock format or a bare integer
fn parse_pid(content: &str) -> Option<i32> {
    let content = content.trim();
    let pid = match serde_json::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Object(map)) => match map.get("PID")? {
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
            serde_json::Value::Number(n) => n.as_i64()?,
            _ => return None,
        },
        Ok(serde_json::Value::Number(n)) => n.as_i64()?,
        _ => return None,
    };
    // 0 and negatives address process groups in kill(2)
    i32::try_from(pid).ok().filter(|pid| *pid > 0)
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    true
}
