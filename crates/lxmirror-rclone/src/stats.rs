//! Live transfer statistics from rclone's remote control
//!
//! Any rclone process started with `--rc` (a mount, a bisync run given
//! `--rc` through `engine.extra_args`, or a standalone `rclone rcd`) answers
//! `core/stats`. The query goes through `rclone rc`, so no HTTP client is
//! needed here.
//!
//! ```text
//! rclone rc core/stats --url http://127.0.0.1:5572/
//! {"bytes": 1048576, "speed": 524288.5, "eta": 12, "transferring": [...], ...}
//! ```

use serde::{Deserialize, Serialize};

/// One file currently being transferred
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferInfo {
    pub name: String,
    pub size: i64,
    pub bytes: i64,
    pub percentage: u8,
    /// Bytes per second
    pub speed: f64,
    /// Seconds left, unknown while the speed is still zero
    pub eta: Option<u64>,
    pub group: String,
}

/// Aggregate counters of one rclone process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferStats {
    pub bytes: u64,
    pub total_bytes: u64,
    pub transfers: u64,
    pub total_transfers: u64,
    pub checks: u64,
    pub total_checks: u64,
    pub deletes: u64,
    pub renames: u64,
    pub errors: u64,
    pub fatal_error: bool,
    pub retry_error: bool,
    /// Bytes per second
    pub speed: f64,
    /// Seconds
    pub elapsed_time: f64,
    pub eta: Option<u64>,
    /// rclone omits the list when nothing is in flight
    pub transferring: Vec<TransferInfo>,
}

impl TransferStats {
    /// Parses the JSON `rclone rc core/stats` prints
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn is_idle(&self) -> bool {
        self.transferring.is_empty()
    }

    /// Completed share of `total_bytes`, 0-100
    pub fn percent_done(&self) -> u8 {
        if self.total_bytes == 0 {
            return if self.is_idle() { 100 } else { 0 };
        }
        (self.bytes.min(self.total_bytes) * 100 / self.total_bytes) as u8
    }
}

/// Formats a byte count with binary units, e.g. `1.50 MiB`
pub fn human_bytes(bytes: f64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes.max(0.0);
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} PiB")
}

/// Formats seconds as `HH:MM:SS`
pub fn human_eta(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
