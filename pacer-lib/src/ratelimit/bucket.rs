use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

/// Snapshot of the quota of a single bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Calls permitted before the current window is exhausted
    pub remaining: u64,

    /// When `remaining` is expected to replenish.
    /// `None` until the server told us about a reset.
    pub reset: Option<SystemTime>,
}

impl Default for BucketState {
    /// New buckets let the first call through.
    fn default() -> Self {
        Self {
            remaining: 1,
            reset: None,
        }
    }
}

impl BucketState {
    /// Time left until the window reopens, if it is currently exhausted.
    ///
    /// Returns `None` if a call may go out right away.
    #[must_use]
    pub fn wait_time(&self, now: SystemTime) -> Option<Duration> {
        if self.remaining > 0 {
            return None;
        }
        self.reset?
            .duration_since(now)
            .ok()
            .filter(|wait| !wait.is_zero())
    }
}

/// Quota state of one endpoint, shared by everyone calling it.
///
/// Each bucket has its own lock, so endpoints never contend with each other.
#[derive(Debug, Default)]
pub(crate) struct Bucket {
    state: Mutex<BucketState>,
}

impl Bucket {
    /// The state is plain `Copy` data, so a poisoned lock is still usable.
    pub(crate) fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> BucketState {
        *self.lock()
    }

    /// Use up one call of the current window, if there is one left
    pub(crate) fn consume(&self) {
        let mut state = self.lock();
        if state.remaining > 0 {
            state.remaining -= 1;
        }
    }
}
