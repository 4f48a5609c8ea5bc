//! Activity records
//!
//! One [`ActivityRecord`] is written per completed or failed operation. The
//! GUI reads them back newest-first from the activity log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{AccountId, PairingId, RecordId};

/// Kind of operation an activity record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A local file was uploaded to the remote
    Upload,
    /// A remote file was downloaded locally
    Download,
    /// A file was deleted on one side to match the other
    Delete,
    /// A server-side rename or move
    Rename,
    /// A full bidirectional pass (one summary record per pass)
    Sync,
    /// A stream pairing was mounted
    Mount,
    /// A stream pairing was unmounted
    Unmount,
    /// A stale lock artifact was reclaimed
    LockRecovered,
    /// An operation failed
    Error,
    /// The filesystem subscription for a pairing was lost
    WatchLost,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivityKind::Upload => "upload",
            ActivityKind::Download => "download",
            ActivityKind::Delete => "delete",
            ActivityKind::Rename => "rename",
            ActivityKind::Sync => "sync",
            ActivityKind::Mount => "mount",
            ActivityKind::Unmount => "unmount",
            ActivityKind::LockRecovered => "lock_recovered",
            ActivityKind::Error => "error",
            ActivityKind::WatchLost => "watch_lost",
        };
        write!(f, "{}", s)
    }
}

/// Result of a recorded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Outcome {
    Success,
    Failure {
        /// Human-readable error message
        message: String,
    },
}

impl Outcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Outcome::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// A logged operation belonging to exactly one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    id: RecordId,
    account_id: AccountId,
    pairing_id: Option<PairingId>,
    timestamp: DateTime<Utc>,
    kind: ActivityKind,
    /// Path relative to the pairing root, or empty for pairing-wide records
    path: String,
    /// Source path for renames
    prior_path: Option<String>,
    outcome: Outcome,
}

impl ActivityRecord {
    /// Creates a record stamped with the current time
    ///
    /// # Example
    ///
    /// ```
    /// use lxmirror_core::domain::{AccountId, ActivityKind, ActivityRecord, Outcome};
    ///
    /// let record = ActivityRecord::new(AccountId::new(), ActivityKind::Upload, Outcome::Success)
    ///     .with_path("notes/todo.md");
    /// assert_eq!(record.path(), "notes/todo.md");
    /// ```
    pub fn new(account_id: AccountId, kind: ActivityKind, outcome: Outcome) -> Self {
        Self {
            id: RecordId::new(),
            account_id,
            pairing_id: None,
            timestamp: Utc::now(),
            kind,
            path: String::new(),
            prior_path: None,
            outcome,
        }
    }

    pub fn with_pairing(mut self, pairing_id: PairingId) -> Self {
        self.pairing_id = Some(pairing_id);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_prior_path(mut self, prior: impl Into<String>) -> Self {
        self.prior_path = Some(prior.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn pairing_id(&self) -> Option<PairingId> {
        self.pairing_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> ActivityKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn prior_path(&self) -> Option<&str> {
        self.prior_path.as_deref()
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_matches_serde() {
        for kind in [
            ActivityKind::Upload,
            ActivityKind::Rename,
            ActivityKind::LockRecovered,
            ActivityKind::WatchLost,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::failure("quota exceeded")).unwrap();
        assert_eq!(json, r#"{"status":"failure","message":"quota exceeded"}"#);
        let json = serde_json::to_string(&Outcome::Success).unwrap();
        assert_eq!(json, r#"{"status":"success"}"#);
    }

    #[test]
    fn test_builder_sets_fields() {
        let account = AccountId::new();
        let pairing = PairingId::new();
        let record = ActivityRecord::new(account, ActivityKind::Rename, Outcome::Success)
            .with_pairing(pairing)
            .with_path("report_final.docx")
            .with_prior_path("report.docx");

        assert_eq!(record.account_id(), account);
        assert_eq!(record.pairing_id(), Some(pairing));
        assert_eq!(record.kind(), ActivityKind::Rename);
        assert_eq!(record.prior_path(), Some("report.docx"));
        assert!(record.outcome().is_success());
    }

    #[test]
    fn test_record_roundtrip_keeps_every_field() {
        let record = ActivityRecord::new(
            AccountId::new(),
            ActivityKind::Error,
            Outcome::failure("engine exited with status 7"),
        )
        .with_pairing(PairingId::new())
        .with_path("a/b.txt")
        .with_prior_path("a/c.txt");

        let json = serde_json::to_string(&record).unwrap();
        let back: ActivityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
