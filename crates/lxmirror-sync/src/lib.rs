//! lxmirror Sync - The synchronization orchestration core
//!
//! Provides:
//! - Temporary-file filtering of raw filesystem events
//! - Recursive filesystem watching with a bounded, non-blocking event buffer
//! - Rename/move disambiguation (native moves, delete+create pairs, directory moves)
//! - Scoped watcher suspension around transfer passes
//! - Stale lock artifact recovery
//! - One scheduler task per pairing, and the orchestrator owning them all
//!
//! ## Flow
//!
//! ```text
//! notify ──→ TempFileFilter ──→ WatchBuffer ──→ Disambiguator ──→ SyncScheduler
//!                                                                   │
//!                                          LockRecovery ←───────────┤
//!                                          ITransferEngine ←────────┤
//!                                          IActivitySink ←──────────┘
//! ```

pub mod disambiguator;
pub mod filter;
pub mod fingerprint;
pub mod lock_recovery;
pub mod orchestrator;
pub mod scheduler;
pub mod suspension;
pub mod watcher;

pub use disambiguator::Disambiguator;
pub use filter::TempFileFilter;
pub use fingerprint::{Fingerprint, FingerprintIndex, Fingerprinter};
pub use lock_recovery::{LockRecovery, PassRegistry, RecoveryReport};
pub use orchestrator::Orchestrator;
pub use scheduler::{
    PassOutcome, SchedulerCommand, SchedulerContext, SchedulerHandle, SchedulerState,
    SchedulerStatus, SyncScheduler,
};
pub use suspension::{SuspensionGuard, WatcherSuspension};
pub use watcher::{Drained, EventProducer, FileWatcher, RawEvent, WatchBuffer, WatchFeed};

use std::path::PathBuf;

use lxmirror_core::domain::{AccountId, DomainError, PairingId};
use thiserror::Error;

/// Errors that can occur in the synchronization core
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred while inspecting local state
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The filesystem subscription could not be created
    #[error("Cannot watch {path}: {reason}")]
    WatchFailed { path: PathBuf, reason: String },

    /// A scheduler is already running for this pairing
    #[error("Pairing {0} already has a running scheduler")]
    AlreadyRunning(PairingId),

    /// No scheduler is running for this pairing
    #[error("Pairing {0} is not running")]
    NotRunning(PairingId),

    /// The account's credentials do not allow syncing
    #[error("Account {0} is not authorized")]
    NotAuthorized(AccountId),

    /// A domain-level error propagated from lxmirror-core
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),
}
