//! Transfer engine port (driven/secondary port)
//!
//! The external engine performs all network I/O: the bidirectional diff and
//! transfer pass, server-side moves, and virtual filesystem mounts. The core
//! only decides when to call it and with which pairing.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because process spawn and I/O errors are
//!   adapter-specific. Callers treat `Err` the same as [`EngineOutcome::Fatal`].
//! - Engine-level classification of a completed call goes in
//!   [`EngineOutcome`], not in the error channel.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::{AccountId, Pairing};

// ============================================================================
// Outcomes
// ============================================================================

/// Classification of a completed engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Success,
    /// Retryable failure (network blip, rate limit, lock contention)
    PartialFailure(String),
    /// Non-retryable failure; repeated occurrences block the pairing
    Fatal(String),
}

impl EngineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, EngineOutcome::Success)
    }

    /// Returns the failure detail, if any
    pub fn detail(&self) -> Option<&str> {
        match self {
            EngineOutcome::Success => None,
            EngineOutcome::PartialFailure(d) | EngineOutcome::Fatal(d) => Some(d),
        }
    }
}

/// Kind of per-file action the engine reported during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileActionKind {
    Upload,
    Download,
    Delete,
}

/// One file-level action performed during a sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAction {
    pub kind: FileActionKind,
    /// Path relative to the pairing root
    pub path: PathBuf,
}

/// Result of a bidirectional sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: EngineOutcome,
    pub actions: Vec<FileAction>,
}

impl SyncReport {
    pub fn new(outcome: EngineOutcome) -> Self {
        Self {
            outcome,
            actions: Vec::new(),
        }
    }

    pub fn with_actions(mut self, actions: Vec<FileAction>) -> Self {
        self.actions = actions;
        self
    }
}

// ============================================================================
// ITransferEngine trait
// ============================================================================

/// Operations the sync core consumes from the transfer engine
///
/// Paths passed to [`move_remote`](ITransferEngine::move_remote) are relative
/// to the pairing's local root; the adapter maps them onto the remote root.
#[async_trait]
pub trait ITransferEngine: Send + Sync {
    /// Runs one bidirectional sync pass for a mirror pairing
    ///
    /// May block for an engine-determined duration. The caller bounds it with
    /// its own timeout and may drop the future to cancel the pass.
    async fn sync(&self, pairing: &Pairing) -> anyhow::Result<SyncReport>;

    /// Renames or moves a remote object without re-transferring content
    async fn move_remote(
        &self,
        pairing: &Pairing,
        from: &Path,
        to: &Path,
    ) -> anyhow::Result<EngineOutcome>;

    /// Mounts a stream pairing's remote root at its local root
    ///
    /// File activity the mount reports afterwards is attributed to `account`.
    async fn mount(&self, account: AccountId, pairing: &Pairing) -> anyhow::Result<EngineOutcome>;

    /// Unmounts a stream pairing
    async fn unmount(&self, pairing: &Pairing) -> anyhow::Result<EngineOutcome>;
}
