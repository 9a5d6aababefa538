//! The cross-process, non-blocking accept lock (§4.1).
//!
//! Backed by a plain `AtomicU32` in shared memory rather than anything resembling an OS mutex,
//! so its representation carries no owning-thread/pid — a requirement for something that must be
//! valid to acquire from whichever worker process gets there first.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::Error;
use crate::shm::SharedRegion;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Serializes `accept()` across worker processes sharing one listening socket.
pub struct AcceptLock {
    region: SharedRegion<AtomicU32>,
}

impl AcceptLock {
    /// Allocate a fresh, unlocked lock in shared memory. Called once by the master before
    /// `fork()`; every worker inherits the mapping this returns is backed by.
    pub fn new() -> Result<Self, Error> {
        Ok(AcceptLock {
            region: SharedRegion::new(AtomicU32::new(UNLOCKED))?,
        })
    }

    /// Attempt to acquire the lock. Never blocks or spins beyond a single CAS: on contention the
    /// caller is expected to yield back to its scheduler rather than wait here.
    #[must_use = "an acquired lock must be released"]
    pub fn try_acquire(&self) -> bool {
        self.region
            .get()
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release a previously acquired lock. Caller must hold it; releasing an unheld lock would
    /// silently grant ownership to nobody and is a caller bug, not a recoverable condition.
    pub fn release(&self) {
        self.region.get().store(UNLOCKED, Ordering::Release);
    }
}
