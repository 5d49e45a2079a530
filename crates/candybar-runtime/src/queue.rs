#![forbid(unsafe_code)]

//! The FIFO between driver threads and the dispatch thread.
//!
//! Drivers push from arbitrary threads through an [`InputSink`]; the
//! dispatch thread pops with a bounded wait so it can interleave queue
//! reads with checks of its own stop state. The queue is the source of
//! truth for the exactly-once-in-order dispatch property: events enqueued
//! while nobody is listening are simply delivered after the next
//! `listen`, still in arrival order.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use candybar_core::{EventSink, InputEvent};

/// Thread-safe FIFO of raw key events.
pub struct EventQueue {
    inner: Mutex<VecDeque<InputEvent>>,
    ready: Condvar,
}

impl EventQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    /// Append one event, waking a blocked popper.
    pub fn push(&self, event: InputEvent) {
        let mut queue = self.inner.lock().unwrap();
        queue.push_back(event);
        self.ready.notify_one();
    }

    /// Pop the oldest event, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout. Loops on spurious wakeups until the
    /// full duration has elapsed.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<InputEvent> {
        let mut queue = self.inner.lock().unwrap();
        let start = Instant::now();

        loop {
            if let Some(event) = queue.pop_front() {
                return Some(event);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return None;
            }
            let (guard, result) = self.ready.wait_timeout(queue, timeout - elapsed).unwrap();
            queue = guard;
            if result.timed_out() && queue.is_empty() {
                return None;
            }
        }
    }

    /// Number of events waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The cloneable sink handed to drivers.
///
/// Always enqueues; whether a dispatch thread is currently draining the
/// queue is the dispatcher's concern, not the driver's.
#[derive(Clone)]
pub struct InputSink {
    queue: Arc<EventQueue>,
}

impl InputSink {
    /// Wrap a queue in a driver-facing sink.
    #[must_use]
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }
}

impl EventSink for InputSink {
    fn send(&self, event: InputEvent) {
        self.queue.push(event);
    }
}
