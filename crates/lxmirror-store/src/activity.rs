//! Activity log
//!
//! Holds at most [`MAX_RECORDS_PER_ACCOUNT`] records per account in memory,
//! evicting the oldest on overflow. Every change marks the account dirty and
//! a background writer task rewrites `activity_<account-id>.json` (a JSON
//! array, oldest first). [`ActivityLog::record`] never touches the disk, so
//! a slow filesystem only delays persistence.
//!
//! Persistence failures are logged with `tracing::warn!` and never
//! propagated to the recording scheduler.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use lxmirror_core::domain::{AccountId, ActivityRecord};
use lxmirror_core::ports::IActivitySink;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::persist::write_atomic;
use crate::StoreError;

/// Per-account capacity of the log
pub const MAX_RECORDS_PER_ACCOUNT: usize = 500;

const FILE_PREFIX: &str = "activity_";
const FILE_SUFFIX: &str = ".json";

enum WriterMsg {
    Persist(AccountId),
    Remove(AccountId),
    Flush(oneshot::Sender<()>),
}

struct Inner {
    logs: DashMap<AccountId, VecDeque<ActivityRecord>>,
    writer: Option<mpsc::UnboundedSender<WriterMsg>>,
}

/// Bounded, persisted, per-account activity log
///
/// Cheap to clone; clones share the same records and writer.
#[derive(Clone)]
pub struct ActivityLog {
    inner: Arc<Inner>,
}

impl ActivityLog {
    /// Creates a log that is never persisted
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                logs: DashMap::new(),
                writer: None,
            }),
        }
    }

    /// Loads every activity file under `dir` and starts the background writer
    ///
    /// Must be called from within a Tokio runtime. Unreadable files are
    /// skipped with a warning.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let logs = DashMap::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let path = entry.path();
            let Some(account_id) = account_from_file_name(&path) else {
                continue;
            };
            match load_file(&path).await {
                Ok(records) => {
                    debug!(account = %account_id, count = records.len(), "Loaded activity");
                    logs.insert(account_id, records);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable activity file"),
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            logs,
            writer: Some(tx),
        });
        tokio::spawn(run_writer(dir, Arc::downgrade(&inner), rx));

        Ok(Self { inner })
    }

    /// Appends a record to its account's log, evicting the oldest at capacity
    pub fn record(&self, record: ActivityRecord) {
        let account_id = record.account_id();
        {
            let mut log = self.inner.logs.entry(account_id).or_default();
            log.push_back(record);
            while log.len() > MAX_RECORDS_PER_ACCOUNT {
                log.pop_front();
            }
        }
        self.notify(WriterMsg::Persist(account_id));
    }

    /// Returns records newest-first, for one account or across all accounts
    pub fn query(&self, account: Option<AccountId>) -> Vec<ActivityRecord> {
        match account {
            Some(id) => self
                .inner
                .logs
                .get(&id)
                .map(|log| log.iter().rev().cloned().collect())
                .unwrap_or_default(),
            None => {
                let mut all: Vec<ActivityRecord> = self
                    .inner
                    .logs
                    .iter()
                    .flat_map(|log| log.value().iter().rev().cloned().collect::<Vec<_>>())
                    .collect();
                all.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
                all
            }
        }
    }

    /// Number of records held for an account
    pub fn len(&self, account: AccountId) -> usize {
        self.inner.logs.get(&account).map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.logs.iter().all(|l| l.is_empty())
    }

    /// Drops an account's records and deletes its file
    pub fn remove_account(&self, account: AccountId) {
        self.inner.logs.remove(&account);
        self.notify(WriterMsg::Remove(account));
    }

    /// Waits until every change made before this call is on disk
    ///
    /// Returns immediately for in-memory logs.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let Some(writer) = &self.inner.writer else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        writer
            .send(WriterMsg::Flush(tx))
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.map_err(|_| StoreError::WriterClosed)
    }

    fn notify(&self, msg: WriterMsg) {
        if let Some(writer) = &self.inner.writer {
            if writer.send(msg).is_err() {
                warn!("Activity writer stopped; change kept in memory only");
            }
        }
    }

    fn snapshot(&self, account: AccountId) -> Option<Vec<ActivityRecord>> {
        self.inner
            .logs
            .get(&account)
            .map(|log| log.iter().cloned().collect())
    }
}

impl IActivitySink for ActivityLog {
    fn record(&self, record: ActivityRecord) {
        ActivityLog::record(self, record);
    }

    fn remove_account(&self, account: AccountId) {
        ActivityLog::remove_account(self, account);
    }
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog")
            .field("accounts", &self.inner.logs.len())
            .field("persistent", &self.inner.writer.is_some())
            .finish()
    }
}

// ============================================================================
// Files
// ============================================================================

/// Path of an account's activity file under `dir`
pub fn activity_file(dir: &Path, account: AccountId) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}{account}{FILE_SUFFIX}"))
}

fn account_from_file_name(path: &Path) -> Option<AccountId> {
    let name = path.file_name()?.to_str()?;
    let id = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    id.parse().ok()
}

async fn load_file(path: &Path) -> Result<VecDeque<ActivityRecord>, StoreError> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    let records: Vec<ActivityRecord> =
        serde_json::from_slice(&content).map_err(|e| StoreError::serialization(path, e))?;
    let skip = records.len().saturating_sub(MAX_RECORDS_PER_ACCOUNT);
    Ok(records.into_iter().skip(skip).collect())
}

// ============================================================================
// Background writer
// ============================================================================

async fn run_writer(
    dir: PathBuf,
    inner: std::sync::Weak<Inner>,
    mut rx: mpsc::UnboundedReceiver<WriterMsg>,
) {
    while let Some(first) = rx.recv().await {
        let mut dirty: HashSet<AccountId> = HashSet::new();
        let mut waiters = Vec::new();
        let mut pending = Some(first);

        // Coalesce everything already queued into one batch
        while let Some(msg) = pending.take().or_else(|| rx.try_recv().ok()) {
            match msg {
                WriterMsg::Persist(id) => {
                    dirty.insert(id);
                }
                WriterMsg::Remove(id) => {
                    dirty.remove(&id);
                    let path = activity_file(&dir, id);
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => info!(account = %id, "Removed activity file"),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove activity file"),
                    }
                }
                WriterMsg::Flush(tx) => waiters.push(tx),
            }
        }

        let Some(strong) = inner.upgrade() else {
            break;
        };
        let log = ActivityLog { inner: strong };
        for id in dirty {
            // Removed since it was marked dirty
            let Some(records) = log.snapshot(id) else {
                continue;
            };
            if let Err(e) = persist(&dir, id, &records).await {
                warn!(account = %id, error = %e, "Failed to persist activity log");
            }
        }
        drop(log);

        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
    debug!("Activity writer stopped");
}

async fn persist(dir: &Path, account: AccountId, records: &[ActivityRecord]) -> Result<(), StoreError> {
    let path = activity_file(dir, account);
    let data = serde_json::to_vec(records).map_err(|e| StoreError::serialization(&path, e))?;
    write_atomic(&path, &data).await
}
