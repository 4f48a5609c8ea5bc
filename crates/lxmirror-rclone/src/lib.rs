//! lxmirror rclone - Transfer engine adapter
//!
//! Implements [`ITransferEngine`](lxmirror_core::ports::ITransferEngine) by
//! shelling out to the `rclone` binary:
//! - `bisync` for mirror passes, re-run once with `--resync` when rclone
//!   reports missing listings
//! - `moveto` for server-side renames
//! - `mount` for stream pairings, one long-lived child per pairing, whose
//!   VFS log is turned into activity records
//! - `rc core/stats` for live transfer statistics
//!
//! Output parsing and exit-status classification live in [`output`] so they
//! can be tested without a binary.

pub mod driver;
pub mod output;
pub mod stats;

pub use driver::{default_mount_point, filter_rules, RcloneDriver};
pub use output::{classify, parse_mount_line, parse_output, BisyncOutput, MountEvent};
pub use stats::{TransferInfo, TransferStats};

use std::path::PathBuf;

use lxmirror_core::domain::{PairingId, PairingMode};

/// Errors raised by the rclone adapter before rclone could report an outcome
#[derive(Debug, thiserror::Error)]
pub enum RcloneError {
    /// The rclone binary (or fusermount) could not be started
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on or signalling a child process failed
    #[error("process error for pairing {pairing}: {source}")]
    Process {
        pairing: PairingId,
        #[source]
        source: std::io::Error,
    },

    /// The operation does not apply to the pairing's mode
    #[error("pairing {pairing} is in {actual} mode, expected {expected}")]
    WrongMode {
        pairing: PairingId,
        actual: PairingMode,
        expected: PairingMode,
    },

    /// The mount point could not be prepared
    #[error("cannot prepare mount point {path}: {source}")]
    MountPoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Nothing answered on the remote-control address
    #[error("rclone remote control at {url} is not reachable: {detail}")]
    RemoteControl { url: String, detail: String },

    /// The remote control answered with something other than stats JSON
    #[error("unexpected reply from rclone remote control: {0}")]
    Stats(#[from] serde_json::Error),
}
