//! Watcher suspension token
//!
//! A scheduler holds a [`SuspensionGuard`] for the whole duration of a
//! transfer pass. While any guard is alive, and for a short grace period after
//! the last one is dropped, the watcher drops events for the pairing's tree
//! instead of buffering them; the pass itself reconciles whatever happened.
//!
//! Release is tied to `Drop`, so it happens on every exit path of the pass:
//! normal return, error, panic, or the pass future being cancelled.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

const NEVER_RELEASED: u64 = u64::MAX;

#[derive(Debug)]
struct SuspensionState {
    holders: AtomicUsize,
    /// Milliseconds since `epoch` of the most recent release
    released_at_ms: AtomicU64,
    epoch: Instant,
    grace: Duration,
}

/// Shared suspension flag for one pairing's watcher
#[derive(Debug, Clone)]
pub struct WatcherSuspension {
    state: Arc<SuspensionState>,
}

impl WatcherSuspension {
    /// Creates an unsuspended flag with the given post-release grace period
    pub fn new(grace: Duration) -> Self {
        Self {
            state: Arc::new(SuspensionState {
                holders: AtomicUsize::new(0),
                released_at_ms: AtomicU64::new(NEVER_RELEASED),
                epoch: Instant::now(),
                grace,
            }),
        }
    }

    /// Suspends the watcher until the returned guard is dropped
    #[must_use = "the watcher resumes as soon as the guard is dropped"]
    pub fn acquire(&self) -> SuspensionGuard {
        self.state.holders.fetch_add(1, Ordering::AcqRel);
        SuspensionGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Number of live guards
    pub fn holders(&self) -> usize {
        self.state.holders.load(Ordering::Acquire)
    }

    /// Returns true if events should currently be dropped
    pub fn is_suspended(&self) -> bool {
        if self.holders() > 0 {
            return true;
        }
        let released = self.state.released_at_ms.load(Ordering::Acquire);
        if released == NEVER_RELEASED {
            return false;
        }
        let elapsed_ms = Instant::now()
            .saturating_duration_since(self.state.epoch)
            .as_millis() as u64;
        elapsed_ms.saturating_sub(released) < self.state.grace.as_millis() as u64
    }
}

/// RAII token; dropping it releases the suspension
#[derive(Debug)]
pub struct SuspensionGuard {
    state: Arc<SuspensionState>,
}

impl Drop for SuspensionGuard {
    fn drop(&mut self) {
        let now_ms = Instant::now()
            .saturating_duration_since(self.state.epoch)
            .as_millis() as u64;
        // Stamp before decrementing so readers never see zero holders without a grace window
        self.state.released_at_ms.store(now_ms, Ordering::Release);
        self.state.holders.fetch_sub(1, Ordering::AcqRel);
    }
}
