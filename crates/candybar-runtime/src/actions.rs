#![forbid(unsafe_code)]

//! The action registry: capabilities contexts expose to external
//! aggregators.
//!
//! Applications build an [`ActionSpec`] (no provider yet) and register it
//! through their context handle; registration stamps the provider context,
//! computes the `full_name`, and appends the resulting immutable [`Action`]
//! to the [`ActionRegistry`]. Consumers — a global actions menu, the
//! first-boot sequencer — read defensive copies and resolve dependencies
//! themselves.
//!
//! The registry is deliberately dumb: append-only, ordered, no collision
//! detection. Duplicate `full_name`s are representable and callers must
//! tolerate them.

use std::fmt;
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use tracing::debug;

/// Separator between provider and action name in a `full_name`.
pub const FULL_NAME_DELIMITER: char = '.';

bitflags! {
    /// Behavioral hints attached to an action.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActionFlags: u8 {
        /// Running this action should wake the backlight.
        const AFFECTS_BACKLIGHT = 1 << 0;
        /// Running this action will switch contexts; aggregator UIs
        /// should not repaint afterwards.
        const WILL_CONTEXT_SWITCH = 1 << 1;
    }
}

/// What kind of record an action is, for consumers that filter by shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Plain callable shown in aggregator menus.
    Simple,
    /// Runs without taking over the screen.
    Background,
    /// Switches to a target context when run.
    ContextSwitch,
    /// Bound to a key rather than a menu entry.
    Key,
    /// One-time setup step for the first-boot sequencer.
    Firstboot,
}

/// A menu label, fixed or computed at display time.
#[derive(Clone)]
pub enum ActionLabel {
    /// Fixed text.
    Text(String),
    /// Recomputed on every read (e.g. "Backlight: on").
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl ActionLabel {
    /// Produce the label text.
    #[must_use]
    pub fn resolve(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Dynamic(f) => f(),
        }
    }
}

impl fmt::Debug for ActionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<&str> for ActionLabel {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ActionLabel {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// The callback an action runs.
pub type ActionCallback = Arc<dyn Fn() + Send + Sync>;

/// An action as built by application code, before registration.
#[derive(Clone)]
pub struct ActionSpec {
    /// Short name, unique per provider by convention.
    pub name: String,
    /// Record shape.
    pub kind: ActionKind,
    /// What runs when the action fires.
    pub callback: ActionCallback,
    /// Optional secondary callback (e.g. a long-press alternative).
    pub aux_callback: Option<ActionCallback>,
    /// Menu label.
    pub label: ActionLabel,
    /// Behavioral hints.
    pub flags: ActionFlags,
    /// Destination for `ContextSwitch` actions. Left `None`, registration
    /// defaults it to the providing context.
    pub target: Option<String>,
    /// Full names of actions that must run first (`Firstboot` only).
    pub dependencies: Vec<String>,
    /// Skip this step when running under the emulator (`Firstboot` only).
    pub skip_on_emulator: bool,
}

impl ActionSpec {
    /// Start a spec with the common defaults: no aux callback, no flags,
    /// no target, no dependencies.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: ActionKind,
        label: impl Into<ActionLabel>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            callback: Arc::new(callback),
            aux_callback: None,
            label: label.into(),
            flags: ActionFlags::empty(),
            target: None,
            dependencies: Vec::new(),
            skip_on_emulator: false,
        }
    }

    /// Attach a secondary callback.
    #[must_use]
    pub fn with_aux(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.aux_callback = Some(Arc::new(callback));
        self
    }

    /// Set behavioral hint flags.
    #[must_use]
    pub fn with_flags(mut self, flags: ActionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set an explicit switch target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Declare first-boot dependencies by full name.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Mark this step as emulator-excluded.
    #[must_use]
    pub fn skip_on_emulator(mut self) -> Self {
        self.skip_on_emulator = true;
        self
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// A registered action record. Created once at registration, never
/// mutated or removed.
#[derive(Clone)]
pub struct Action {
    /// Short name carried over from the [`ActionSpec`].
    pub name: String,
    /// `provider.name`.
    pub full_name: String,
    /// The context that registered this action.
    pub provider: String,
    /// Record shape.
    pub kind: ActionKind,
    /// What runs when the action fires.
    pub callback: ActionCallback,
    /// Optional secondary callback.
    pub aux_callback: Option<ActionCallback>,
    /// Menu label.
    pub label: ActionLabel,
    /// Behavioral hints.
    pub flags: ActionFlags,
    /// Switch destination; always set for `ContextSwitch` records.
    pub target: Option<String>,
    /// First-boot dependency full names.
    pub dependencies: Vec<String>,
    /// Emulator-exclusion flag for first-boot steps.
    pub skip_on_emulator: bool,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("full_name", &self.full_name)
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Append-only, ordered registry of [`Action`] records.
#[derive(Default)]
pub struct ActionRegistry {
    actions: Mutex<Vec<Action>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `provider` onto `spec` and append the resulting record.
    ///
    /// A `ContextSwitch` spec with no explicit target defaults its target
    /// to the provider itself. Returns a copy of the registered record.
    pub fn register(&self, provider: &str, spec: ActionSpec) -> Action {
        let target = match spec.kind {
            ActionKind::ContextSwitch => spec.target.or_else(|| Some(provider.to_string())),
            _ => spec.target,
        };
        let action = Action {
            full_name: format!("{provider}{FULL_NAME_DELIMITER}{}", spec.name),
            name: spec.name,
            provider: provider.to_string(),
            kind: spec.kind,
            callback: spec.callback,
            aux_callback: spec.aux_callback,
            label: spec.label,
            flags: spec.flags,
            target,
            dependencies: spec.dependencies,
            skip_on_emulator: spec.skip_on_emulator,
        };
        debug!(full_name = %action.full_name, kind = ?action.kind, "action registered");
        self.actions.lock().unwrap().push(action.clone());
        action
    }

    /// All registered actions, in registration order, as a defensive copy.
    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    /// Number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.lock().unwrap().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn registration_stamps_provider_and_full_name() {
        let registry = ActionRegistry::new();
        let action = registry.register(
            "clock",
            ActionSpec::new("set_alarm", ActionKind::Simple, "Set alarm", || {}),
        );

        assert_eq!(action.full_name, "clock.set_alarm");
        assert_eq!(action.provider, "clock");
        assert_eq!(action.label.resolve(), "Set alarm");
    }

    #[test]
    fn context_switch_defaults_target_to_provider() {
        let registry = ActionRegistry::new();
        let action = registry.register(
            "games",
            ActionSpec::new("play", ActionKind::ContextSwitch, "Play", || {}),
        );
        assert_eq!(action.target.as_deref(), Some("games"));

        let explicit = registry.register(
            "games",
            ActionSpec::new("quit", ActionKind::ContextSwitch, "Quit", || {})
                .with_target("main_menu"),
        );
        assert_eq!(explicit.target.as_deref(), Some("main_menu"));
    }

    #[test]
    fn non_switch_actions_keep_target_unset() {
        let registry = ActionRegistry::new();
        let action = registry.register(
            "torch",
            ActionSpec::new("toggle", ActionKind::Background, "Torch", || {}),
        );
        assert_eq!(action.target, None);
    }

    #[test]
    fn actions_returns_independent_copies() {
        let registry = ActionRegistry::new();
        registry.register(
            "a",
            ActionSpec::new("one", ActionKind::Simple, "One", || {}),
        );

        let mut first = registry.actions();
        first.clear();

        let second = registry.actions();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].full_name, "a.one");
    }

    #[test]
    fn registration_order_is_preserved() {
        let registry = ActionRegistry::new();
        for name in ["one", "two", "three"] {
            registry.register(
                "ctx",
                ActionSpec::new(name, ActionKind::Simple, name, || {}),
            );
        }

        let names: Vec<String> = registry.actions().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[test]
    fn duplicate_full_names_are_representable() {
        let registry = ActionRegistry::new();
        registry.register(
            "ctx",
            ActionSpec::new("dup", ActionKind::Simple, "First", || {}),
        );
        registry.register(
            "ctx",
            ActionSpec::new("dup", ActionKind::Simple, "Second", || {}),
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn firstboot_spec_carries_dependencies_and_exclusion() {
        let registry = ActionRegistry::new();
        let action = registry.register(
            "setup",
            ActionSpec::new("format_card", ActionKind::Firstboot, "Format card", || {})
                .with_dependencies(["setup.partition"])
                .skip_on_emulator(),
        );
        assert_eq!(action.dependencies, vec!["setup.partition"]);
        assert!(action.skip_on_emulator);
    }

    #[test]
    fn dynamic_labels_recompute_on_each_read() {
        let counter = Arc::new(AtomicUsize::new(0));
        let state = counter.clone();
        let label = ActionLabel::Dynamic(Arc::new(move || {
            format!("reads: {}", state.fetch_add(1, Ordering::SeqCst) + 1)
        }));

        assert_eq!(label.resolve(), "reads: 1");
        assert_eq!(label.resolve(), "reads: 2");
    }

    #[test]
    fn callbacks_survive_registration() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let registry = ActionRegistry::new();
        let action = registry.register(
            "ctx",
            ActionSpec::new("hit", ActionKind::Key, "Hit", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        (action.callback)();
        (registry.actions()[0].callback)();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
