#![forbid(unsafe_code)]

//! Canonical input event types.
//!
//! A key event is a driver-supplied key name plus an optional
//! press/release/hold tag. Key names are plain strings because the key space
//! is owned by the drivers (keypads differ between device revisions); the
//! [`keys`] module fixes the canonical names so applications and drivers
//! agree on identifiers.
//!
//! # Design Notes
//!
//! - Drivers that cannot distinguish press from release send events with no
//!   state tag; consumers treat a missing tag as a press.
//! - Events derive `Clone`, `PartialEq`, and `Eq` for use in tests and
//!   pattern matching, and serde for the anticipated event bus.

use serde::{Deserialize, Serialize};

/// Canonical key names.
///
/// Drivers for the reference keypad emit exactly these identifiers. Custom
/// drivers may add names of their own; the runtime treats every name
/// opaquely.
pub mod keys {
    /// Confirm / center softkey.
    pub const KEY_ENTER: &str = "KEY_ENTER";
    /// Back / cancel.
    pub const KEY_LEFT: &str = "KEY_LEFT";
    /// Forward / options.
    pub const KEY_RIGHT: &str = "KEY_RIGHT";
    /// Scroll up.
    pub const KEY_UP: &str = "KEY_UP";
    /// Scroll down.
    pub const KEY_DOWN: &str = "KEY_DOWN";
    /// Page up (long lists).
    pub const KEY_PAGEUP: &str = "KEY_PAGEUP";
    /// Page down (long lists).
    pub const KEY_PAGEDOWN: &str = "KEY_PAGEDOWN";
    /// Call / answer.
    pub const KEY_ANSWER: &str = "KEY_ANSWER";
    /// Hang up / home.
    pub const KEY_HANGUP: &str = "KEY_HANGUP";
    /// Programmable function keys present on some revisions.
    pub const KEY_F1: &str = "KEY_F1";
    /// See [`KEY_F1`].
    pub const KEY_F2: &str = "KEY_F2";
    /// See [`KEY_F1`].
    pub const KEY_F3: &str = "KEY_F3";
    /// See [`KEY_F1`].
    pub const KEY_F4: &str = "KEY_F4";
    /// See [`KEY_F1`].
    pub const KEY_F5: &str = "KEY_F5";
    /// Numeric keypad rows. `KEY_0`..`KEY_9`, star, and pound.
    pub const KEY_0: &str = "KEY_0";
    /// See [`KEY_0`].
    pub const KEY_1: &str = "KEY_1";
    /// See [`KEY_0`].
    pub const KEY_2: &str = "KEY_2";
    /// See [`KEY_0`].
    pub const KEY_3: &str = "KEY_3";
    /// See [`KEY_0`].
    pub const KEY_4: &str = "KEY_4";
    /// See [`KEY_0`].
    pub const KEY_5: &str = "KEY_5";
    /// See [`KEY_0`].
    pub const KEY_6: &str = "KEY_6";
    /// See [`KEY_0`].
    pub const KEY_7: &str = "KEY_7";
    /// See [`KEY_0`].
    pub const KEY_8: &str = "KEY_8";
    /// See [`KEY_0`].
    pub const KEY_9: &str = "KEY_9";
    /// Star key.
    pub const KEY_STAR: &str = "KEY_STAR";
    /// Pound / hash key.
    pub const KEY_POUND: &str = "KEY_POUND";
}

/// The press/release/hold tag attached to a key event.
///
/// Only drivers with level-aware hardware report `Released` and `Held`;
/// matrix keypads usually report presses only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyState {
    /// Key went down.
    Pressed,
    /// Key came back up.
    Released,
    /// Key is being held past the driver's repeat threshold.
    Held,
}

/// A raw key event as pushed by a driver thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Key identifier, e.g. [`keys::KEY_ENTER`].
    pub key: String,
    /// Optional press/release/hold tag; `None` means the driver only knows
    /// "the key fired" and is read as a press.
    pub state: Option<KeyState>,
}

impl InputEvent {
    /// Create a stateless key event (read as a press).
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: None,
        }
    }

    /// Create a key event with an explicit state tag.
    #[must_use]
    pub fn with_state(key: impl Into<String>, state: KeyState) -> Self {
        Self {
            key: key.into(),
            state: Some(state),
        }
    }

    /// Check whether this event names a specific key.
    #[must_use]
    pub fn is_key(&self, key: &str) -> bool {
        self.key == key
    }

    /// Check whether this event counts as a press.
    ///
    /// A missing state tag counts: stateless drivers only emit on press.
    #[must_use]
    pub fn is_press(&self) -> bool {
        matches!(self.state, None | Some(KeyState::Pressed))
    }
}
