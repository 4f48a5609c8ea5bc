//! lxmirror Store - Durable state for the sync core
//!
//! Two small JSON-backed stores:
//! - [`ActivityLog`] - bounded per-account activity records, persisted by a
//!   background writer so callers never wait on disk
//! - [`AccountStore`] - the `accounts.json` file holding accounts and pairings
//!
//! Both write atomically (temp file + rename) so a crash never leaves a
//! truncated file behind.

pub mod accounts;
pub mod activity;
mod persist;

pub use accounts::{find_account, find_account_mut, AccountStore};
pub use activity::{ActivityLog, MAX_RECORDS_PER_ACCOUNT};

use std::path::PathBuf;

/// Errors that can occur while loading or saving persistent state
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing a file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be parsed or a value could not be encoded
    #[error("Serialization error in {path}: {message}")]
    Serialization { path: PathBuf, message: String },

    /// The background writer has shut down
    #[error("Activity writer is not running")]
    WriterClosed,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, err: serde_json::Error) -> Self {
        StoreError::Serialization {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
