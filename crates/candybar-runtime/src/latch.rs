#![forbid(unsafe_code)]

//! Set-once condition-variable flag.
//!
//! A [`Latch`] replaces the ad hoc boolean polling the runtime would
//! otherwise need in three places: the stop signal handed to a context
//! target, the ready gate a background start waits on, and the dispatch
//! thread's shutdown check. Setting is one-way; a latch is never reset,
//! a fresh one is created per worker activation instead.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A one-way flag that threads can wait on without spinning.
///
/// Cloning shares the underlying flag; any clone may set it, any clone
/// may observe or wait on it.
#[derive(Clone)]
pub struct Latch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Latch {
    /// Create an unset latch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Set the latch, waking all waiters. Idempotent.
    pub fn set(&self) {
        let (lock, cvar) = &*self.inner;
        let mut set = lock.lock().unwrap();
        *set = true;
        cvar.notify_all();
    }

    /// Check the latch without blocking.
    #[must_use]
    pub fn is_set(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap()
    }

    /// Wait for the latch or a timeout.
    ///
    /// Returns `true` if the latch was set, `false` if the timeout expired.
    /// Loops on spurious wakeups until the full duration has elapsed.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut set = lock.lock().unwrap();
        if *set {
            return true;
        }

        let start = Instant::now();
        let mut remaining = duration;

        loop {
            let (guard, result) = cvar.wait_timeout(set, remaining).unwrap();
            set = guard;
            if *set {
                return true;
            }
            if result.timed_out() {
                return false;
            }
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return false;
            }
            remaining = duration - elapsed;
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch").field("set", &self.is_set()).finish()
    }
}
