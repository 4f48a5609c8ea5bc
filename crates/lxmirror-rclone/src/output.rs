//! rclone log parsing and exit-status classification
//!
//! rclone writes its log to stderr, one line per message:
//!
//! ```text
//! 2024/05/01 10:00:00 INFO  : - Path1    Queue copy to Path2    - gdrive:Docs/report.docx
//! 2024/05/01 10:00:00 ERROR : Bisync critical error: cannot find prior Path1 or Path2 listings
//! ```
//!
//! Path1 is always the local root and Path2 the remote root, so a copy to
//! Path2 is an upload and a copy to Path1 a download.
//!
//! A running mount logs per-file VFS messages as `<path>: <message>`;
//! [`parse_mount_line`] picks out the reads, uploads and deletes.

use std::path::PathBuf;

use lxmirror_core::domain::Pairing;
use lxmirror_core::ports::{EngineOutcome, FileAction, FileActionKind};

const COPY_TO_REMOTE: &str = "Queue copy to Path2";
const COPY_TO_LOCAL: &str = "Queue copy to Path1";
const QUEUE_DELETE: &str = "Queue delete";

const RESYNC_MARKERS: &[&str] = &[
    "cannot find prior path1 or path2 listings",
    "must run --resync",
    "--resync is required",
];
const CRITICAL_MARKERS: &[&str] = &["bisync critical error", "bisync aborted"];
const LOCK_MARKERS: &[&str] = &["prior lock file found", "lock file found"];
const BENIGN_MARKERS: &[&str] = &["cannot remove lockfile"];

const VFS_READ_OPEN: &str = "Open: flags=O_RDONLY";
const VFS_UPLOADED: &str = "vfs cache: upload succeeded";
const VFS_UPLOAD_FAILED: &str = "vfs cache: failed to upload";
const REMOTE_DELETED: &str = "Deleted";

/// Application scratch files a mount sees constantly; never reported
const MOUNT_NOISE_SUFFIXES: &[&str] = &[".tmp", ".part", ".partial", ".lock"];
const MOUNT_NOISE_NAMES: &[&str] = &["desktop.ini", "thumbs.db"];

/// Everything the adapter needs from one rclone run's log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BisyncOutput {
    /// Per-file actions, paths relative to the pairing root
    pub actions: Vec<FileAction>,
    /// rclone asked for a `--resync` run
    pub needs_resync: bool,
    /// Another session holds the bisync lock
    pub lock_contention: bool,
    /// First critical-abort message, if any
    pub critical: Option<String>,
    /// Last ERROR line, used as the failure detail
    pub last_error: Option<String>,
}

/// Parses rclone's combined log output for a pairing
pub fn parse_output(text: &str, pairing: &Pairing) -> BisyncOutput {
    let mut out = BisyncOutput::default();
    let local_root = format!("{}/", pairing.local_root().display());
    let remote_root = pairing.remote_path_for(std::path::Path::new(""));

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if BENIGN_MARKERS.iter().any(|m| lower.contains(m)) {
            continue;
        }

        if let Some(kind) = action_kind(line) {
            if let Some(path) = action_path(line, &local_root, &remote_root) {
                out.actions.push(FileAction { kind, path });
            }
            continue;
        }

        let message = message_of(line);
        if RESYNC_MARKERS.iter().any(|m| lower.contains(m)) {
            out.needs_resync = true;
        }
        if LOCK_MARKERS.iter().any(|m| lower.contains(m)) {
            out.lock_contention = true;
        }
        if out.critical.is_none() && CRITICAL_MARKERS.iter().any(|m| lower.contains(m)) {
            out.critical = Some(message.to_string());
        }
        if line.contains("ERROR") {
            out.last_error = Some(message.to_string());
        }
    }
    out
}

fn action_kind(line: &str) -> Option<FileActionKind> {
    if line.contains(COPY_TO_REMOTE) {
        Some(FileActionKind::Upload)
    } else if line.contains(COPY_TO_LOCAL) {
        Some(FileActionKind::Download)
    } else if line.contains(QUEUE_DELETE) {
        Some(FileActionKind::Delete)
    } else {
        None
    }
}

/// Extracts the root-relative path after the action's `- ` separator
fn action_path(line: &str, local_root: &str, remote_root: &str) -> Option<PathBuf> {
    let marker = [COPY_TO_REMOTE, COPY_TO_LOCAL, QUEUE_DELETE]
        .iter()
        .find_map(|m| line.find(m).map(|i| i + m.len()))?;
    let rest = &line[marker..];
    let raw = rest.trim_start().strip_prefix("- ")?.trim();

    // Newer rclone versions print placeholders instead of the roots
    let prefixes: [&str; 4] = ["{path1/}", "{path2/}", remote_root, local_root];
    let mut rel = raw;
    for prefix in prefixes {
        if let Some(stripped) = rel.strip_prefix(prefix) {
            rel = stripped;
            break;
        }
    }
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() {
        None
    } else {
        Some(PathBuf::from(rel))
    }
}

/// One file-level event from a running mount's log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEvent {
    pub kind: FileActionKind,
    /// Relative to the mounted remote root
    pub path: String,
    /// rclone reported the operation as failed
    pub error: Option<String>,
}

/// Recognizes a VFS file event in one line of `rclone mount` output
///
/// Directory entries (trailing `/`), the mount root and scratch files are
/// ignored.
pub fn parse_mount_line(line: &str) -> Option<MountEvent> {
    let message = message_of(line.trim());
    let (path, what) = message.split_once(": ")?;
    let path = path.trim().trim_start_matches('/');
    if path.is_empty() || path.ends_with('/') || is_mount_noise(path) {
        return None;
    }

    let (kind, error) = if what.starts_with(VFS_READ_OPEN) {
        (FileActionKind::Download, None)
    } else if what.starts_with(VFS_UPLOADED) {
        (FileActionKind::Upload, None)
    } else if what.starts_with(VFS_UPLOAD_FAILED) {
        (FileActionKind::Upload, Some(what.trim().to_string()))
    } else if what.trim() == REMOTE_DELETED {
        (FileActionKind::Delete, None)
    } else {
        return None;
    };
    Some(MountEvent {
        kind,
        path: path.to_string(),
        error,
    })
}

fn is_mount_noise(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    name.starts_with(".~lock.")
        || MOUNT_NOISE_NAMES.contains(&name.as_str())
        || MOUNT_NOISE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Strips the timestamp and level prefix from a log line
fn message_of(line: &str) -> &str {
    for level in ["ERROR", "NOTICE", "INFO", "DEBUG"] {
        if let Some(i) = line.find(level) {
            let after = &line[i + level.len()..];
            if let Some(rest) = after.trim_start().strip_prefix(':') {
                return rest.trim();
            }
        }
    }
    line
}

/// Maps an rclone exit status plus its parsed log onto an engine outcome
///
/// `exit_code` is `None` when the process was killed by a signal.
pub fn classify(exit_code: Option<i32>, out: &BisyncOutput) -> EngineOutcome {
    let detail = |fallback: String| out.last_error.clone().unwrap_or(fallback);

    if out.lock_contention {
        return EngineOutcome::PartialFailure(detail(
            "bisync lock is held by another session".to_string(),
        ));
    }
    if let Some(critical) = &out.critical {
        return EngineOutcome::Fatal(critical.clone());
    }
    match exit_code {
        // 9: nothing to transfer
        Some(0) | Some(9) => EngineOutcome::Success,
        // 5: temporary error, 6: less serious errors, 8: transfer limit reached
        Some(code @ (5 | 6 | 8)) => {
            EngineOutcome::PartialFailure(detail(format!("rclone exited with status {code}")))
        }
        Some(code) => EngineOutcome::Fatal(detail(format!("rclone exited with status {code}"))),
        None => EngineOutcome::PartialFailure("rclone was terminated by a signal".to_string()),
    }
}
