#![forbid(unsafe_code)]

//! One isolated execution unit and its application-facing handle.
//!
//! A [`Context`] owns an optional worker thread and an exclusively-owned
//! pair of I/O ports. The worker is created lazily, once per activation:
//! it runs the context's target, and a completion block that fires whether
//! the target returns or panics reports the outcome back to the manager —
//! so the manager never mistakes a crashed context for a running one. The
//! panic itself is resumed afterwards and lands in the worker's join
//! handle.
//!
//! Application code never sees the `Context` itself. It holds a
//! [`ContextHandle`], whose request operations are thin forwards into the
//! manager's single event entry point, each tagged with this context's
//! name; the manager retains full policy control.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use candybar_core::{InputPort, IoError, KeyBinding, OutputPort, ScreenFrame};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::actions::{Action, ActionKind, ActionSpec};
use crate::error::ContextError;
use crate::latch::Latch;
use crate::manager::{ContextEvent, ContextManager, EventReply};

/// How a context target ended.
///
/// The explicit return value replaces exit-signal exceptions: `Finished`
/// hands the screen back for good (the cached frame is cleared so it never
/// flashes on the next activation), `Background` hands it back while the
/// context keeps working off-screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    /// The application is done; return to the previous context and drop
    /// the stale frame.
    Finished,
    /// The application yields the screen but keeps running.
    Background,
}

/// A context entry point.
///
/// Runs on the worker thread. The latch is the cooperative stop signal:
/// targets that wait should wait on it, and every target must return
/// promptly once it is set.
pub type ContextTarget = Arc<dyn Fn(&Latch) -> TargetOutcome + Send + Sync>;

/// Where the worker's completion block reports.
pub(crate) type CompletionSink = Arc<dyn Fn(&str, TargetOutcome) + Send + Sync>;

/// Derived lifecycle tag reported by context listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    /// Worker thread is alive.
    Running,
    /// Threaded but no live worker.
    Inactive,
    /// Externally driven; has no worker of its own.
    NonThreaded,
}

struct Worker {
    handle: thread::JoinHandle<()>,
    stop: Latch,
    ready: Latch,
}

/// One isolated execution unit. Owned by the manager, never by
/// applications.
pub(crate) struct Context {
    name: String,
    threaded: bool,
    menu_name: Mutex<String>,
    target: Mutex<Option<ContextTarget>>,
    input: Arc<dyn InputPort>,
    output: Arc<dyn OutputPort>,
    worker: Mutex<Option<Worker>>,
}

impl Context {
    pub(crate) fn new(
        name: impl Into<String>,
        threaded: bool,
        input: Arc<dyn InputPort>,
        output: Arc<dyn OutputPort>,
    ) -> Self {
        let name = name.into();
        Self {
            menu_name: Mutex::new(name.clone()),
            name,
            threaded,
            target: Mutex::new(None),
            input,
            output,
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn menu_name(&self) -> String {
        self.menu_name.lock().unwrap().clone()
    }

    pub(crate) fn set_menu_name(&self, menu_name: impl Into<String>) {
        *self.menu_name.lock().unwrap() = menu_name.into();
    }

    pub(crate) fn set_target(&self, target: ContextTarget) {
        *self.target.lock().unwrap() = Some(target);
    }

    pub(crate) fn has_target(&self) -> bool {
        self.target.lock().unwrap().is_some()
    }

    pub(crate) fn is_threaded(&self) -> bool {
        self.threaded
    }

    pub(crate) fn input(&self) -> &Arc<dyn InputPort> {
        &self.input
    }

    pub(crate) fn output(&self) -> &Arc<dyn OutputPort> {
        &self.output
    }

    pub(crate) fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub(crate) fn state(&self) -> ContextState {
        if !self.threaded {
            ContextState::NonThreaded
        } else if self.is_running() {
            ContextState::Running
        } else {
            ContextState::Inactive
        }
    }

    /// Bring this context to life.
    ///
    /// Non-threaded contexts and `start_thread = false` activations are
    /// no-ops: something external drives them. A live worker is also a
    /// no-op — one worker per activation, recreated only after the old one
    /// exits. Threaded with no target is a configuration error and the
    /// triggering switch rolls back.
    pub(crate) fn activate(
        &self,
        start_thread: bool,
        completion: CompletionSink,
    ) -> Result<(), ContextError> {
        if !self.threaded || !start_thread {
            return Ok(());
        }

        let mut worker = self.worker.lock().unwrap();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!(context = %self.name, "activate: worker already live");
            return Ok(());
        }

        let target = self.target.lock().unwrap().clone().ok_or_else(|| {
            ContextError::Configuration(format!("threaded context `{}` has no target", self.name))
        })?;

        let stop = Latch::new();
        let ready = Latch::new();
        let name = self.name.clone();
        let output = self.output.clone();
        let worker_stop = stop.clone();
        let worker_ready = ready.clone();

        let handle = thread::Builder::new()
            .name(format!("candybar-ctx-{name}"))
            .spawn(move || {
                worker_ready.set();
                debug!(context = %name, "worker started");
                let result = catch_unwind(AssertUnwindSafe(|| target(&worker_stop)));
                let outcome = match &result {
                    Ok(outcome) => *outcome,
                    // A crashed target still hands the screen back.
                    Err(_) => TargetOutcome::Finished,
                };
                if worker_stop.is_set() {
                    debug!(context = %name, "worker exit during shutdown, completion suppressed");
                } else {
                    if outcome == TargetOutcome::Finished
                        && let Err(err) = output.clear()
                    {
                        warn!(context = %name, error = %err, "output clear on finish failed");
                    }
                    debug!(context = %name, ?outcome, "worker completed");
                    completion(&name, outcome);
                }
                if let Err(payload) = result {
                    resume_unwind(payload);
                }
            })
            .map_err(|e| {
                ContextError::Configuration(format!(
                    "failed to spawn worker for `{}`: {e}",
                    self.name
                ))
            })?;

        *worker = Some(Worker {
            handle,
            stop,
            ready,
        });
        Ok(())
    }

    /// Wait for the worker to report ready after an activation.
    ///
    /// Non-threaded contexts are trivially ready.
    pub(crate) fn wait_ready(&self, timeout: Duration) -> bool {
        let ready = {
            let worker = self.worker.lock().unwrap();
            match worker.as_ref() {
                Some(w) => w.ready.clone(),
                None => return !self.threaded,
            }
        };
        ready.wait_timeout(timeout)
    }

    /// Trigger the stop latch and join the worker. Used only at shutdown;
    /// exit is strictly cooperative.
    pub(crate) fn stop_and_join(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            worker.stop.set();
            if worker.handle.thread().id() != thread::current().id() {
                // A panicking target is expected here; the panic was
                // already reported as a Finished completion.
                let _ = worker.handle.join();
            }
        }
    }
}

/// The application-facing handle for one context.
///
/// Every operation forwards into [`ContextManager::signal_event`] tagged
/// with this context's name. Handles are cheap to clone and safe to move
/// into worker threads and key callbacks.
#[derive(Clone)]
pub struct ContextHandle {
    name: String,
    manager: Weak<ContextManager>,
}

impl ContextHandle {
    pub(crate) fn new(name: impl Into<String>, manager: Weak<ContextManager>) -> Self {
        Self {
            name: name.into(),
            manager,
        }
    }

    /// This context's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn manager(&self) -> Result<Arc<ContextManager>, ContextError> {
        self.manager.upgrade().ok_or(ContextError::RuntimeGone)
    }

    fn signal(&self, event: ContextEvent) -> Result<EventReply, ContextError> {
        self.manager()?.signal_event(&self.name, event)
    }

    fn signal_bool(&self, event: ContextEvent) -> Result<bool, ContextError> {
        match self.signal(event)? {
            EventReply::Bool(value) => Ok(value),
            reply => unreachable_reply(reply),
        }
    }

    /// Bind this context's entry point.
    pub fn set_target(
        &self,
        target: impl Fn(&Latch) -> TargetOutcome + Send + Sync + 'static,
    ) -> Result<(), ContextError> {
        self.signal(ContextEvent::SetTarget(Arc::new(target)))?;
        Ok(())
    }

    /// Set the label shown in context listings.
    pub fn set_menu_name(&self, menu_name: impl Into<String>) -> Result<(), ContextError> {
        self.signal(ContextEvent::SetMenuName(menu_name.into()))?;
        Ok(())
    }

    /// Ask to become the current context.
    ///
    /// Returns `false` when denied (someone else holds exclusivity).
    pub fn request_switch(&self) -> Result<bool, ContextError> {
        self.signal_bool(ContextEvent::RequestSwitchTo(self.name.clone()))
    }

    /// Ask to switch to a named context.
    pub fn request_switch_to(&self, dest: impl Into<String>) -> Result<bool, ContextError> {
        self.signal_bool(ContextEvent::RequestSwitchTo(dest.into()))
    }

    /// Request the exclusive switch lock (lock screens).
    ///
    /// Granted only to contexts on the manager's allow-list, and only when
    /// nobody else holds it.
    pub fn request_exclusive(&self) -> Result<bool, ContextError> {
        self.signal_bool(ContextEvent::RequestExclusive)
    }

    /// Release the exclusive switch lock. Only the holder may rescind.
    pub fn rescind_exclusive(&self) -> Result<bool, ContextError> {
        self.signal_bool(ContextEvent::RescindExclusive)
    }

    /// Whether this context currently holds the exclusive lock.
    pub fn has_exclusive(&self) -> Result<bool, ContextError> {
        self.signal_bool(ContextEvent::ExclusiveStatus)
    }

    /// Activate a context without making it current (pre-warm).
    ///
    /// Returns once the worker reports ready, `false` on timeout.
    pub fn request_context_start(&self, name: impl Into<String>) -> Result<bool, ContextError> {
        self.signal_bool(ContextEvent::StartContext(name.into()))
    }

    /// The cached frame of the context that was active before this one.
    pub fn get_previous_context_image(&self) -> Result<Option<ScreenFrame>, ContextError> {
        match self.signal(ContextEvent::PreviousContextImage)? {
            EventReply::Image(frame) => Ok(frame),
            reply => unreachable_reply(reply),
        }
    }

    /// The cached frame of a named context (screenshots, peeking).
    pub fn get_context_image(
        &self,
        name: impl Into<String>,
    ) -> Result<Option<ScreenFrame>, ContextError> {
        match self.signal(ContextEvent::ContextImage(name.into()))? {
            EventReply::Image(frame) => Ok(frame),
            reply => unreachable_reply(reply),
        }
    }

    /// Snapshot of every registered context.
    pub fn list_contexts(&self) -> Result<Vec<ContextSnapshot>, ContextError> {
        match self.signal(ContextEvent::ListContexts)? {
            EventReply::Contexts(snapshots) => Ok(snapshots),
            reply => unreachable_reply(reply),
        }
    }

    /// Register an action provided by this context.
    pub fn register_action(&self, spec: ActionSpec) -> Result<Action, ContextError> {
        match self.signal(ContextEvent::RegisterAction(spec))? {
            EventReply::Registered(action) => Ok(action),
            reply => unreachable_reply(reply),
        }
    }

    /// Register a first-boot action; the kind is forced to
    /// [`ActionKind::Firstboot`].
    pub fn register_firstboot_action(&self, mut spec: ActionSpec) -> Result<Action, ContextError> {
        spec.kind = ActionKind::Firstboot;
        self.register_action(spec)
    }

    /// All registered actions, as a defensive copy.
    pub fn get_actions(&self) -> Result<Vec<Action>, ContextError> {
        match self.signal(ContextEvent::GetActions)? {
            EventReply::Actions(actions) => Ok(actions),
            reply => unreachable_reply(reply),
        }
    }

    /// Bind keys directly on the physical driver, ahead of all dispatch
    /// modes. Returns per-key results; a key already bound globally fails
    /// with [`IoError::GlobalKeyTaken`] without affecting the others.
    pub fn request_global_keymap(
        &self,
        bindings: HashMap<String, KeyBinding>,
    ) -> Result<HashMap<String, Result<(), IoError>>, ContextError> {
        match self.signal(ContextEvent::GlobalKeymap(bindings))? {
            EventReply::GlobalKeys(results) => Ok(results),
            reply => unreachable_reply(reply),
        }
    }

    /// Whether this context is the current one.
    pub fn is_active(&self) -> Result<bool, ContextError> {
        self.signal_bool(ContextEvent::IsActive)
    }

    /// This context's output port, for drawing.
    pub fn output(&self) -> Result<Arc<dyn OutputPort>, ContextError> {
        self.manager()?.context_output(&self.name)
    }

    /// This context's input port, for keymap and mode configuration.
    pub fn input(&self) -> Result<Arc<dyn InputPort>, ContextError> {
        self.manager()?.context_input(&self.name)
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Snapshot row returned by context listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Unique context name.
    pub name: String,
    /// Display label.
    pub menu_name: String,
    /// The context that was active when this one was entered.
    pub previous: Option<String>,
    /// Derived lifecycle tag.
    pub state: ContextState,
}

// The manager replies to each event variant with exactly one reply shape;
// a mismatch is a bug in the manager, not a caller error.
fn unreachable_reply<T>(reply: EventReply) -> Result<T, ContextError> {
    unreachable!("mismatched event reply: {reply:?}")
}
