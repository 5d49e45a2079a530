#![forbid(unsafe_code)]

//! The input dispatcher: raw key signals in, ordered callback calls out.
//!
//! Driver threads push [`InputEvent`]s into the shared [`EventQueue`]; one
//! dispatch thread pulls them with a bounded wait and invokes exactly one
//! callback per event. Three lookup layers apply, in order:
//!
//! 1. **global bindings** — keys bound directly on the physical driver via
//!    the manager; persist across context switches;
//! 2. **streaming mode** — when set, every remaining event goes verbatim to
//!    one handler (raw timing consumers: games, key-repeat detection);
//! 3. **keymap mode** — exact key name to [`KeyBinding`] lookup, the default.
//!
//! Events dispatch strictly in arrival order, one at a time, never
//! concurrently. Callbacks may therefore mutate shared UI state without a
//! lock of their own, at the cost of a slow callback stalling all further
//! input.
//!
//! # Re-entrancy
//!
//! A callback running *on* the dispatch thread may itself call
//! [`stop_listen`](InputDispatcher::stop_listen),
//! [`set_keymap`](InputDispatcher::set_keymap), or
//! [`listen`](InputDispatcher::listen) — this happens whenever a context
//! switch reconfigures input for the newly active context before the call
//! returns. `listen` therefore spawns the fresh dispatch thread rather than
//! looping in place, and the fresh thread joins its predecessor before
//! pulling events so two threads never dispatch concurrently.
//!
//! Callback panics are not suppressed here; they unwind the dispatch thread
//! and a later `listen` replaces it. Higher layers wrap their own targets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use candybar_core::{
    EventSink, InputDriver, InputEvent, IoError, KeyBinding, KeyState, Keymap, StreamHandler,
};
use tracing::{debug, trace};

use crate::queue::{EventQueue, InputSink};

/// Tuning knobs for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How long one queue poll blocks before re-checking the stop state.
    pub poll_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
        }
    }
}

impl DispatchConfig {
    /// Override the queue poll timeout.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

/// Mode and binding state, guarded by one mutex that is never held across
/// a callback invocation.
struct DispatchState {
    keymap: Keymap,
    streaming: Option<StreamHandler>,
    globals: HashMap<String, KeyBinding>,
    listening: bool,
    // Bumped by every `listen`; a dispatch loop exits when the state
    // generation no longer matches its own.
    generation: u64,
}

/// What the lookup layers resolved for one event.
enum Resolved {
    Binding(KeyBinding),
    Stream(StreamHandler),
    Unbound,
}

/// Converts raw key signals from driver threads into strictly ordered
/// callback invocations on a single consumer thread.
pub struct InputDispatcher {
    queue: Arc<EventQueue>,
    driver: Arc<dyn InputDriver>,
    config: DispatchConfig,
    state: Mutex<DispatchState>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl InputDispatcher {
    /// Create a dispatcher over one physical driver. Delivery starts only
    /// on the first [`listen`](Self::listen).
    #[must_use]
    pub fn new(driver: Arc<dyn InputDriver>, config: DispatchConfig) -> Arc<Self> {
        Arc::new(Self {
            queue: Arc::new(EventQueue::new()),
            driver,
            config,
            state: Mutex::new(DispatchState {
                keymap: Keymap::new(),
                streaming: None,
                globals: HashMap::new(),
                listening: false,
                generation: 0,
            }),
            worker: Mutex::new(None),
        })
    }

    /// Enqueue one key signal, as a driver would.
    ///
    /// Safe from any thread; always enqueues, whether or not a dispatch
    /// thread is currently listening.
    pub fn send_key(&self, key: impl Into<String>, state: Option<KeyState>) {
        let key = key.into();
        let event = match state {
            Some(state) => InputEvent::with_state(key, state),
            None => InputEvent::new(key),
        };
        self.queue.push(event);
    }

    /// A cloneable sink onto the dispatch queue, for wiring drivers by hand.
    #[must_use]
    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::new(InputSink::new(self.queue.clone()))
    }

    /// Replace the keymap-mode binding table.
    pub fn set_keymap(&self, keymap: Keymap) {
        self.state.lock().unwrap().keymap = keymap;
    }

    /// Drop all keymap-mode bindings.
    pub fn clear_keymap(&self) {
        self.state.lock().unwrap().keymap.clear();
    }

    /// Enter streaming mode: every non-global event goes to `handler`.
    pub fn set_streaming(&self, handler: StreamHandler) {
        self.state.lock().unwrap().streaming = Some(handler);
    }

    /// Leave streaming mode, falling back to keymap lookup.
    pub fn remove_streaming(&self) {
        self.state.lock().unwrap().streaming = None;
    }

    /// Bind a key ahead of both dispatch modes.
    ///
    /// Global bindings persist across context switches and are consulted
    /// before streaming or keymap lookup. One binding per key name; a
    /// second bind for the same key fails with
    /// [`IoError::GlobalKeyTaken`].
    pub fn bind_global(&self, key: impl Into<String>, binding: KeyBinding) -> Result<(), IoError> {
        let key = key.into();
        let mut state = self.state.lock().unwrap();
        if state.globals.contains_key(&key) {
            return Err(IoError::GlobalKeyTaken(key));
        }
        debug!(key = %key, "global key bound");
        state.globals.insert(key, binding);
        Ok(())
    }

    /// Start (or restart) event delivery.
    ///
    /// Clears the stop state, starts the driver, and spawns a fresh
    /// dispatch thread. The fresh thread first joins its predecessor (a
    /// no-op if none, or if the predecessor already unwound from a callback
    /// panic) so dispatch is never concurrent. Safe to call from a
    /// callback running on the current dispatch thread.
    pub fn listen(self: &Arc<Self>) -> Result<(), IoError> {
        let generation = {
            let mut state = self.state.lock().unwrap();
            state.listening = true;
            state.generation += 1;
            state.generation
        };

        self.driver.start(self.sink())?;

        let mut worker = self.worker.lock().unwrap();
        let predecessor = worker.take();
        let dispatcher = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("candybar-input-dispatch".into())
            .spawn(move || {
                if let Some(predecessor) = predecessor {
                    let _ = predecessor.join();
                }
                dispatcher.dispatch_loop(generation);
            })
            .map_err(|e| IoError::device(format!("failed to spawn dispatch thread: {e}")))?;
        *worker = Some(handle);

        debug!(generation, "input dispatch listening");
        Ok(())
    }

    /// Halt event delivery and the driver.
    ///
    /// The dispatch thread notices on its next poll and exits; events
    /// already queued stay queued for the next `listen`. Safe to call from
    /// the dispatch thread itself.
    pub fn stop_listen(&self) -> Result<(), IoError> {
        self.state.lock().unwrap().listening = false;
        self.driver.stop()?;
        debug!("input dispatch stopped");
        Ok(())
    }

    /// Whether delivery is currently enabled.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state.lock().unwrap().listening
    }

    /// Stop delivery and join the dispatch thread.
    ///
    /// Must not be called from the dispatch thread; the manager calls this
    /// once at shutdown.
    pub fn shutdown(&self) {
        let _ = self.stop_listen();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
    }

    fn dispatch_loop(&self, generation: u64) {
        loop {
            {
                let state = self.state.lock().unwrap();
                if !state.listening || state.generation != generation {
                    break;
                }
            }

            let Some(event) = self.queue.pop_timeout(self.config.poll_timeout) else {
                continue;
            };

            // Resolve under the lock, invoke outside it: the callback may
            // re-enter set_keymap/stop_listen/listen on this very thread.
            let resolved = {
                let state = self.state.lock().unwrap();
                if let Some(binding) = state.globals.get(&event.key) {
                    Resolved::Binding(binding.clone())
                } else if let Some(handler) = &state.streaming {
                    Resolved::Stream(handler.clone())
                } else if let Some(binding) = state.keymap.get(&event.key) {
                    Resolved::Binding(binding.clone())
                } else {
                    Resolved::Unbound
                }
            };

            match resolved {
                Resolved::Binding(binding) => {
                    trace!(key = %event.key, "dispatching bound key");
                    binding.invoke(&event);
                }
                Resolved::Stream(handler) => {
                    trace!(key = %event.key, state = ?event.state, "streaming event");
                    handler(&event);
                }
                Resolved::Unbound => {
                    trace!(key = %event.key, "unbound key dropped");
                }
            }
        }
        debug!(generation, "dispatch loop exited");
    }
}
