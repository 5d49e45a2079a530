#![forbid(unsafe_code)]

//! The context manager: sole authority over which context owns the
//! hardware.
//!
//! All transitions run under one switching mutex, through a two-phase
//! switch with nested rollback:
//!
//! 1. tentatively point `current` at the destination;
//! 2. reattach the destination's I/O port pair — on failure, reattach the
//!    previous context's I/O, and if that also fails, take the
//!    unconditional failsafe switch to the fallback context;
//! 3. activate the destination — on failure, roll back symmetrically
//!    (previous I/O, previous activation), again collapsing to the
//!    failsafe if any rollback step fails.
//!
//! The failsafe cannot itself fail: fallback validity is verified before
//! every switch touches `current`, and the failsafe routine attaches
//! best-effort, logging and swallowing errors. A failed switch therefore
//! never leaves the user on a frozen or blank screen.
//!
//! Everything application code may ask of the manager funnels through
//! [`signal_event`](ContextManager::signal_event), tagged with the
//! requesting context's name — switch requests, exclusivity, action
//! registration, listings, image queries, background starts, global keys.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use candybar_core::{InputPort, IoError, KeyBinding, OutputDevice, OutputPort, ScreenFrame};
use tracing::{debug, info, warn};

use crate::actions::{Action, ActionRegistry, ActionSpec};
use crate::context::{
    CompletionSink, Context, ContextHandle, ContextSnapshot, ContextTarget, TargetOutcome,
};
use crate::dispatch::InputDispatcher;
use crate::error::ContextError;
use crate::proxy::{InputProxy, OutputProxy};

/// Manager policy knobs.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// The always-valid safe context. Must be created before the first
    /// switch; every switch verifies it is present and well-formed.
    pub fallback_context: String,
    /// Contexts allowed to request the exclusive switch lock.
    pub exclusive_allowlist: Vec<String>,
    /// How long a background start waits for the worker's ready signal.
    pub start_ready_timeout: Duration,
}

impl ManagerConfig {
    /// Config with the given fallback context and no exclusive
    /// allow-list.
    #[must_use]
    pub fn new(fallback_context: impl Into<String>) -> Self {
        Self {
            fallback_context: fallback_context.into(),
            exclusive_allowlist: Vec::new(),
            start_ready_timeout: Duration::from_secs(2),
        }
    }

    /// Allow the named contexts to request exclusivity.
    #[must_use]
    pub fn with_exclusive_allowlist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusive_allowlist = names.into_iter().map(Into::into).collect();
        self
    }

    /// Override the background-start ready timeout.
    #[must_use]
    pub fn with_start_ready_timeout(mut self, timeout: Duration) -> Self {
        self.start_ready_timeout = timeout;
        self
    }
}

/// A request or signal arriving at the manager's event entry point.
pub enum ContextEvent {
    /// The source context's target returned [`TargetOutcome::Finished`].
    Finished,
    /// The source context's target returned [`TargetOutcome::Background`].
    Background,
    /// Switch to the named context (the source itself for
    /// `request_switch`).
    RequestSwitchTo(String),
    /// Request the exclusive switch lock.
    RequestExclusive,
    /// Release the exclusive switch lock.
    RescindExclusive,
    /// Does the source hold the exclusive lock?
    ExclusiveStatus,
    /// Activate the named context without making it current.
    StartContext(String),
    /// Cached frame of the named context.
    ContextImage(String),
    /// Cached frame of the source's previous context.
    PreviousContextImage,
    /// Snapshot of all contexts.
    ListContexts,
    /// Register an action provided by the source.
    RegisterAction(ActionSpec),
    /// Defensive copy of the action registry.
    GetActions,
    /// Bind keys ahead of all dispatch modes.
    GlobalKeymap(HashMap<String, KeyBinding>),
    /// Bind the source's entry point.
    SetTarget(ContextTarget),
    /// Set the source's listing label.
    SetMenuName(String),
    /// Is the source the current context?
    IsActive,
}

impl fmt::Debug for ContextEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => f.write_str("Finished"),
            Self::Background => f.write_str("Background"),
            Self::RequestSwitchTo(dest) => f.debug_tuple("RequestSwitchTo").field(dest).finish(),
            Self::RequestExclusive => f.write_str("RequestExclusive"),
            Self::RescindExclusive => f.write_str("RescindExclusive"),
            Self::ExclusiveStatus => f.write_str("ExclusiveStatus"),
            Self::StartContext(name) => f.debug_tuple("StartContext").field(name).finish(),
            Self::ContextImage(name) => f.debug_tuple("ContextImage").field(name).finish(),
            Self::PreviousContextImage => f.write_str("PreviousContextImage"),
            Self::ListContexts => f.write_str("ListContexts"),
            Self::RegisterAction(spec) => f.debug_tuple("RegisterAction").field(spec).finish(),
            Self::GetActions => f.write_str("GetActions"),
            Self::GlobalKeymap(bindings) => {
                let mut keys: Vec<&String> = bindings.keys().collect();
                keys.sort();
                f.debug_tuple("GlobalKeymap").field(&keys).finish()
            }
            Self::SetTarget(_) => f.write_str("SetTarget(..)"),
            Self::SetMenuName(name) => f.debug_tuple("SetMenuName").field(name).finish(),
            Self::IsActive => f.write_str("IsActive"),
        }
    }
}

/// Typed reply for each [`ContextEvent`].
#[derive(Debug)]
pub enum EventReply {
    /// No payload.
    Unit,
    /// Granted/denied or yes/no.
    Bool(bool),
    /// A cached frame, if one exists.
    Image(Option<ScreenFrame>),
    /// Context listing.
    Contexts(Vec<ContextSnapshot>),
    /// Registry copy.
    Actions(Vec<Action>),
    /// The freshly registered record.
    Registered(Action),
    /// Per-key global bind results.
    GlobalKeys(HashMap<String, Result<(), IoError>>),
}

/// State guarded by the switching mutex. The previous-context map and the
/// exclusivity holder live here too, so they share the mutex's guarantees.
struct ManagerState {
    contexts: HashMap<String, Arc<Context>>,
    current: Option<String>,
    previous: HashMap<String, String>,
    exclusive: Option<String>,
    shutting_down: bool,
}

/// Orchestrator owning every context, the action registry, and the
/// physical screen and input dispatcher.
pub struct ContextManager {
    screen: Arc<dyn OutputDevice>,
    dispatcher: Arc<InputDispatcher>,
    config: ManagerConfig,
    registry: ActionRegistry,
    state: Mutex<ManagerState>,
}

impl ContextManager {
    /// Create a manager over one physical screen and input dispatcher.
    #[must_use]
    pub fn new(
        screen: Arc<dyn OutputDevice>,
        dispatcher: Arc<InputDispatcher>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            screen,
            dispatcher,
            config,
            registry: ActionRegistry::new(),
            state: Mutex::new(ManagerState {
                contexts: HashMap::new(),
                current: None,
                previous: HashMap::new(),
                exclusive: None,
                shutting_down: false,
            }),
        })
    }

    /// Register a context with default multiplexing ports.
    ///
    /// Context names are unique and the map is append-only; re-registering
    /// a name fails with [`ContextError::DuplicateContext`].
    pub fn create_context(
        self: &Arc<Self>,
        name: impl Into<String>,
        threaded: bool,
    ) -> Result<ContextHandle, ContextError> {
        let input: Arc<dyn InputPort> = Arc::new(InputProxy::new(self.dispatcher.clone()));
        let output: Arc<dyn OutputPort> = Arc::new(OutputProxy::new(self.screen.clone()));
        self.create_context_with_ports(name, threaded, input, output)
    }

    /// Register a context with caller-supplied ports.
    pub fn create_context_with_ports(
        self: &Arc<Self>,
        name: impl Into<String>,
        threaded: bool,
        input: Arc<dyn InputPort>,
        output: Arc<dyn OutputPort>,
    ) -> Result<ContextHandle, ContextError> {
        let name = name.into();
        let mut state = self.state.lock().unwrap();
        if state.shutting_down {
            return Err(ContextError::ShuttingDown);
        }
        if state.contexts.contains_key(&name) {
            return Err(ContextError::DuplicateContext(name));
        }
        info!(context = %name, threaded, "context created");
        state.contexts.insert(
            name.clone(),
            Arc::new(Context::new(name.clone(), threaded, input, output)),
        );
        Ok(ContextHandle::new(name, Arc::downgrade(self)))
    }

    /// The active context's name, if a switch has happened yet.
    #[must_use]
    pub fn current_context(&self) -> Option<String> {
        self.state.lock().unwrap().current.clone()
    }

    /// The context that was active when `name` was last entered.
    #[must_use]
    pub fn previous_context(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().previous.get(name).cloned()
    }

    /// Who holds the exclusive switch lock, if anyone.
    #[must_use]
    pub fn exclusive_holder(&self) -> Option<String> {
        self.state.lock().unwrap().exclusive.clone()
    }

    /// Defensive copy of the action registry.
    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        self.registry.actions()
    }

    pub(crate) fn context_output(&self, name: &str) -> Result<Arc<dyn OutputPort>, ContextError> {
        let state = self.state.lock().unwrap();
        state
            .contexts
            .get(name)
            .map(|ctx| ctx.output().clone())
            .ok_or_else(|| ContextError::UnknownContext(name.to_string()))
    }

    pub(crate) fn context_input(&self, name: &str) -> Result<Arc<dyn InputPort>, ContextError> {
        let state = self.state.lock().unwrap();
        state
            .contexts
            .get(name)
            .map(|ctx| ctx.input().clone())
            .ok_or_else(|| ContextError::UnknownContext(name.to_string()))
    }

    /// Switch to a named context.
    ///
    /// The whole decide→attach→activate(→rollback) sequence runs under
    /// the switching mutex. With `do_raise` unset, recoverable failures —
    /// attach or activation errors that the rollback cascade absorbed —
    /// are swallowed; request-level errors (unknown destination, missing
    /// fallback) always propagate.
    pub fn switch_to_context(
        self: &Arc<Self>,
        dest: &str,
        do_raise: bool,
    ) -> Result<(), ContextError> {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down {
            return Err(ContextError::ShuttingDown);
        }
        self.switch_locked(&mut state, dest, do_raise)
    }

    /// The central switch algorithm. Caller holds the switching mutex.
    fn switch_locked(
        self: &Arc<Self>,
        state: &mut ManagerState,
        dest: &str,
        do_raise: bool,
    ) -> Result<(), ContextError> {
        self.verify_fallback(state)?;

        let dest_ctx = state
            .contexts
            .get(dest)
            .cloned()
            .ok_or_else(|| ContextError::UnknownContext(dest.to_string()))?;

        let prev_name = state.current.clone();
        let prev_ctx = prev_name
            .as_ref()
            .and_then(|name| state.contexts.get(name))
            .cloned();

        debug!(from = ?prev_name, to = %dest, "switch begin");

        // Record the back-reference before attempting the switch so
        // back-references stay consistent mid-failure; `displaced`
        // remembers what to restore if the switch does not stick.
        // previous[x] == x is never recorded.
        let displaced = match &prev_name {
            Some(prev) if prev != dest => {
                Some(state.previous.insert(dest.to_string(), prev.clone()))
            }
            _ => None,
        };
        let restore_previous = |state: &mut ManagerState| match displaced.clone() {
            Some(Some(old)) => {
                state.previous.insert(dest.to_string(), old);
            }
            Some(None) => {
                state.previous.remove(dest);
            }
            None => {}
        };

        state.current = Some(dest.to_string());

        // Phase 1: move the hardware to the destination's ports.
        if let Err(err) = attach_io(prev_ctx.as_deref(), &dest_ctx) {
            warn!(to = %dest, error = %err, "I/O attach failed, restoring previous");
            restore_previous(state);
            match &prev_ctx {
                Some(prev) if attach_io(Some(&dest_ctx), prev).is_ok() => {
                    state.current = prev_name;
                }
                _ => self.failsafe_locked(state),
            }
            return if do_raise { Err(err) } else { Ok(()) };
        }

        // Phase 2: bring the destination to life.
        if let Err(err) = dest_ctx.activate(true, self.completion_sink()) {
            warn!(to = %dest, error = %err, "activation failed, rolling back");
            restore_previous(state);
            match &prev_ctx {
                Some(prev)
                    if attach_io(Some(&dest_ctx), prev).is_ok()
                        && prev.activate(true, self.completion_sink()).is_ok() =>
                {
                    state.current = prev_name;
                }
                _ => self.failsafe_locked(state),
            }
            return if do_raise { Err(err) } else { Ok(()) };
        }

        info!(context = %dest, "switch complete");
        Ok(())
    }

    /// Every switch verifies the fallback invariant before touching
    /// `current`: configurations without a provably reachable fallback are
    /// rejected outright.
    fn verify_fallback(&self, state: &ManagerState) -> Result<(), ContextError> {
        let fallback = &self.config.fallback_context;
        match state.contexts.get(fallback) {
            Some(ctx) if !ctx.is_threaded() || ctx.has_target() => Ok(()),
            _ => Err(ContextError::FallbackMissing(fallback.clone())),
        }
    }

    /// The unconditional safe landing. Infallible by construction:
    /// attaches are best-effort and `current` is set regardless, the
    /// fallback being externally driven. No back-reference is recorded;
    /// the back-stack only tracks intentional switches.
    fn failsafe_locked(self: &Arc<Self>, state: &mut ManagerState) {
        let fallback = self.config.fallback_context.clone();
        warn!(fallback = %fallback, "failsafe switch");

        for ctx in state.contexts.values() {
            ctx.input().detach();
            ctx.output().detach();
        }
        // verify_fallback ran before `current` moved, so the lookup holds.
        if let Some(ctx) = state.contexts.get(&fallback) {
            if let Err(err) = ctx.output().attach() {
                warn!(error = %err, "failsafe output attach failed");
            }
            if let Err(err) = InputPort::attach(ctx.input().as_ref()) {
                warn!(error = %err, "failsafe input attach failed");
            }
            // start_thread = false cannot fail: the fallback is driven
            // externally.
            let _ = ctx.activate(false, self.completion_sink());
        }
        state.current = Some(fallback);
    }

    fn completion_sink(self: &Arc<Self>) -> CompletionSink {
        let manager = Arc::downgrade(self);
        Arc::new(move |name: &str, outcome: TargetOutcome| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let event = match outcome {
                TargetOutcome::Finished => ContextEvent::Finished,
                TargetOutcome::Background => ContextEvent::Background,
            };
            if let Err(err) = manager.signal_event(name, event) {
                warn!(context = %name, error = %err, "completion signal failed");
            }
        })
    }

    /// The single multiplexed entry point for everything a context may ask
    /// of the manager. `source` is the requesting context's name, stamped
    /// by its handle.
    pub fn signal_event(
        self: &Arc<Self>,
        source: &str,
        event: ContextEvent,
    ) -> Result<EventReply, ContextError> {
        debug!(source = %source, event = ?event, "signal event");
        match event {
            ContextEvent::Finished | ContextEvent::Background => {
                self.handle_completion(source)?;
                Ok(EventReply::Unit)
            }
            ContextEvent::RequestSwitchTo(dest) => {
                let mut state = self.state.lock().unwrap();
                if state.shutting_down {
                    return Err(ContextError::ShuttingDown);
                }
                // While exclusivity is held, the only valid request is the
                // holder switching to itself.
                if let Some(holder) = &state.exclusive
                    && (holder != source || dest != *holder)
                {
                    debug!(source = %source, dest = %dest, holder = %holder, "switch denied: exclusive held");
                    return Ok(EventReply::Bool(false));
                }
                self.switch_locked(&mut state, &dest, false)?;
                Ok(EventReply::Bool(true))
            }
            ContextEvent::RequestExclusive => {
                let mut state = self.state.lock().unwrap();
                let allowed = self
                    .config
                    .exclusive_allowlist
                    .iter()
                    .any(|name| name == source);
                let granted = match (&state.exclusive, allowed) {
                    (_, false) => false,
                    (Some(holder), true) => holder == source,
                    (None, true) => {
                        state.exclusive = Some(source.to_string());
                        true
                    }
                };
                info!(source = %source, granted, "exclusive requested");
                Ok(EventReply::Bool(granted))
            }
            ContextEvent::RescindExclusive => {
                let mut state = self.state.lock().unwrap();
                if state.exclusive.as_deref() == Some(source) {
                    state.exclusive = None;
                    info!(source = %source, "exclusive rescinded");
                    Ok(EventReply::Bool(true))
                } else {
                    Ok(EventReply::Bool(false))
                }
            }
            ContextEvent::ExclusiveStatus => {
                let state = self.state.lock().unwrap();
                Ok(EventReply::Bool(state.exclusive.as_deref() == Some(source)))
            }
            ContextEvent::StartContext(name) => {
                let ctx = {
                    let state = self.state.lock().unwrap();
                    if state.shutting_down {
                        return Err(ContextError::ShuttingDown);
                    }
                    let ctx = state
                        .contexts
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| ContextError::UnknownContext(name.clone()))?;
                    // Spawn under the switching mutex so a concurrent
                    // shutdown either joins this worker or refuses the
                    // request; only the ready wait happens outside.
                    ctx.activate(true, self.completion_sink())?;
                    ctx
                };
                let ready = ctx.wait_ready(self.config.start_ready_timeout);
                debug!(context = %name, ready, "background start");
                Ok(EventReply::Bool(ready))
            }
            ContextEvent::ContextImage(name) => {
                let state = self.state.lock().unwrap();
                let ctx = state
                    .contexts
                    .get(&name)
                    .ok_or_else(|| ContextError::UnknownContext(name.clone()))?;
                Ok(EventReply::Image(ctx.output().cached_frame()))
            }
            ContextEvent::PreviousContextImage => {
                let state = self.state.lock().unwrap();
                let frame = state
                    .previous
                    .get(source)
                    .and_then(|name| state.contexts.get(name))
                    .and_then(|ctx| ctx.output().cached_frame());
                Ok(EventReply::Image(frame))
            }
            ContextEvent::ListContexts => {
                let state = self.state.lock().unwrap();
                let mut snapshots: Vec<ContextSnapshot> = state
                    .contexts
                    .values()
                    .map(|ctx| ContextSnapshot {
                        name: ctx.name().to_string(),
                        menu_name: ctx.menu_name(),
                        previous: state.previous.get(ctx.name()).cloned(),
                        state: ctx.state(),
                    })
                    .collect();
                snapshots.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(EventReply::Contexts(snapshots))
            }
            ContextEvent::RegisterAction(spec) => {
                Ok(EventReply::Registered(self.registry.register(source, spec)))
            }
            ContextEvent::GetActions => Ok(EventReply::Actions(self.registry.actions())),
            ContextEvent::GlobalKeymap(bindings) => {
                let mut results = HashMap::with_capacity(bindings.len());
                for (key, binding) in bindings {
                    let result = self.dispatcher.bind_global(key.clone(), binding);
                    results.insert(key, result);
                }
                Ok(EventReply::GlobalKeys(results))
            }
            ContextEvent::SetTarget(target) => {
                let state = self.state.lock().unwrap();
                let ctx = state
                    .contexts
                    .get(source)
                    .ok_or_else(|| ContextError::UnknownContext(source.to_string()))?;
                ctx.set_target(target);
                Ok(EventReply::Unit)
            }
            ContextEvent::SetMenuName(menu_name) => {
                let state = self.state.lock().unwrap();
                let ctx = state
                    .contexts
                    .get(source)
                    .ok_or_else(|| ContextError::UnknownContext(source.to_string()))?;
                ctx.set_menu_name(menu_name);
                Ok(EventReply::Unit)
            }
            ContextEvent::IsActive => {
                let state = self.state.lock().unwrap();
                Ok(EventReply::Bool(state.current.as_deref() == Some(source)))
            }
        }
    }

    /// A target returned: hand the screen back to the context that was
    /// active when the finished one was entered, or to the fallback if
    /// none was recorded. Stale signals — a context that is no longer
    /// current, or anything during shutdown — are logged and ignored: the
    /// screen already belongs to someone else.
    fn handle_completion(self: &Arc<Self>, source: &str) -> Result<(), ContextError> {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down {
            return Ok(());
        }
        if state.current.as_deref() != Some(source) {
            debug!(context = %source, "completion for non-current context ignored");
            return Ok(());
        }
        let dest = state
            .previous
            .get(source)
            .cloned()
            .unwrap_or_else(|| self.config.fallback_context.clone());
        debug!(from = %source, to = %dest, "returning to previous context");
        self.switch_locked(&mut state, &dest, false)
    }

    /// Orderly teardown: trigger every worker's stop latch, join the
    /// worker threads, and shut the dispatcher down. Further requests fail
    /// with [`ContextError::ShuttingDown`]; completion signals arriving
    /// during teardown are ignored.
    pub fn shutdown(&self) {
        let contexts: Vec<Arc<Context>> = {
            let mut state = self.state.lock().unwrap();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.contexts.values().cloned().collect()
        };
        info!("context manager shutting down");
        for ctx in contexts {
            ctx.stop_and_join();
        }
        self.dispatcher.shutdown();
    }
}

impl Drop for ContextManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Move the hardware from one context's ports to another's.
///
/// Detach is infallible; attach replays output first, then input, and a
/// failed input attach detaches the output again so the pair is never
/// half-attached. Runs only inside the switching mutex.
fn attach_io(from: Option<&Context>, to: &Context) -> Result<(), ContextError> {
    if let Some(from) = from {
        from.input().detach();
        from.output().detach();
    }
    to.output().attach()?;
    if let Err(err) = InputPort::attach(to.input().as_ref()) {
        to.output().detach();
        return Err(err.into());
    }
    Ok(())
}
