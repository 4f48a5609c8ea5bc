//! Activity sink port
//!
//! Schedulers report every completed or failed operation through this trait.
//! Implementations must accept a record without waiting on disk.

use crate::domain::{AccountId, ActivityRecord};

/// Append-only destination for activity records
///
/// `record` is called from the scheduler's control path and must return
/// immediately. Persistence may lag behind the in-memory state.
pub trait IActivitySink: Send + Sync {
    fn record(&self, record: ActivityRecord);

    /// Drops every record of a removed account
    fn remove_account(&self, _account: AccountId) {}
}
