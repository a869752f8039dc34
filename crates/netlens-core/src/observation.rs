//! Detachable observation of a task's current request
//!
//! The producer submits change notifications through [`ObservationToken::run_if_active`];
//! the owning task entry invalidates the token when the task is finalized.
//! Submission and invalidation take the same lock, so once `invalidate`
//! returns no further notification can reach the queue. Work that already
//! reached the queue is still processed.

use parking_lot::Mutex;
use std::sync::Arc;

/// Shared on/off switch for one task's property observation
#[derive(Debug, Clone)]
pub struct ObservationToken {
    active: Arc<Mutex<bool>>,
}

impl ObservationToken {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(true)),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }

    /// Run `submit` while holding the token, only if it is still active.
    ///
    /// `submit` must not block; it runs with the lock held.
    pub fn run_if_active(&self, submit: impl FnOnce()) -> bool {
        let active = self.active.lock();
        if *active {
            submit();
        }
        *active
    }

    /// Stop observing. Idempotent; returns whether this call did the detaching.
    pub fn invalidate(&self) -> bool {
        std::mem::replace(&mut *self.active.lock(), false)
    }
}

impl Default for ObservationToken {
    fn default() -> Self {
        Self::new()
    }
}
