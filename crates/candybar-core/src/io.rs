#![forbid(unsafe_code)]

//! Capability traits at the hardware boundary.
//!
//! Every party in the I/O path programs against one of these seams:
//!
//! - Physical screens implement [`OutputDevice`]; physical keypads implement
//!   [`InputDriver`] and push events through an [`EventSink`].
//! - Applications see [`OutputDevice`] + [`InputControl`] on their private
//!   port pair.
//! - The switching machinery sees [`OutputPort`]/[`InputPort`], the
//!   attachable supersets implemented by the built-in multiplexing proxies
//!   (and by any caller-supplied port object).
//!
//! Being explicit traits rather than presence-of-method checks means a
//! malformed port fails at construction or attach time with a typed error,
//! never midway through a switch with a missing-attribute crash.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::IoError;
use crate::event::InputEvent;
use crate::frame::{MonoImage, ScreenFrame};

// ---------------------------------------------------------------------------
// Key bindings
// ---------------------------------------------------------------------------

/// A key callback resolved at registration time.
///
/// The two arities cover the two consumer shapes: menu-style code that only
/// cares *that* a key fired, and code that wants the full event (for state
/// tags). Resolution happens once when the binding is built; dispatch is a
/// direct call.
#[derive(Clone)]
pub enum KeyBinding {
    /// Callback ignoring the event payload.
    Nullary(Arc<dyn Fn() + Send + Sync>),
    /// Callback receiving the full event.
    Unary(Arc<dyn Fn(&InputEvent) + Send + Sync>),
}

impl KeyBinding {
    /// Bind a zero-argument callback.
    pub fn nullary(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self::Nullary(Arc::new(f))
    }

    /// Bind a callback that receives the event.
    pub fn unary(f: impl Fn(&InputEvent) + Send + Sync + 'static) -> Self {
        Self::Unary(Arc::new(f))
    }

    /// Invoke the binding for one event.
    pub fn invoke(&self, event: &InputEvent) {
        match self {
            Self::Nullary(f) => f(),
            Self::Unary(f) => f(event),
        }
    }
}

impl fmt::Debug for KeyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nullary(_) => f.write_str("KeyBinding::Nullary(..)"),
            Self::Unary(_) => f.write_str("KeyBinding::Unary(..)"),
        }
    }
}

/// Key name → binding table used in keymap mode.
pub type Keymap = HashMap<String, KeyBinding>;

/// The single callback used in streaming mode.
pub type StreamHandler = Arc<dyn Fn(&InputEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// Output side
// ---------------------------------------------------------------------------

/// The display primitives a character/pixel screen accepts.
///
/// Implemented by physical screens and by per-context output ports. All
/// methods take `&self`; implementations handle their own interior locking
/// because frames arrive from arbitrary application threads.
pub trait OutputDevice: Send + Sync {
    /// Show character-mode content, one string per display row.
    fn display_data(&self, lines: &[String]) -> Result<(), IoError>;

    /// Show a packed monochrome bitmap.
    fn display_image(&self, image: &MonoImage) -> Result<(), IoError>;

    /// Blank the display.
    fn clear(&self) -> Result<(), IoError>;
}

/// An attachable output endpoint multiplexing the shared screen.
///
/// # Contract
///
/// - While detached, display calls must succeed locally (cached), never
///   touching the hardware.
/// - `attach` replays the cached frame so the screen immediately shows this
///   context's content; a failed replay leaves the port detached.
/// - `detach` is infallible; the port merely stops forwarding.
pub trait OutputPort: OutputDevice {
    /// Connect this port to the hardware and replay the cached frame.
    fn attach(&self) -> Result<(), IoError>;

    /// Disconnect from the hardware.
    fn detach(&self);

    /// The last frame displayed through this port, if any.
    fn cached_frame(&self) -> Option<ScreenFrame>;
}

// ---------------------------------------------------------------------------
// Input side
// ---------------------------------------------------------------------------

/// The input-configuration surface applications program against.
///
/// Implemented by the real dispatcher and by per-context input ports.
pub trait InputControl: Send + Sync {
    /// Replace the keymap-mode binding table.
    fn set_keymap(&self, keymap: Keymap) -> Result<(), IoError>;

    /// Drop all keymap-mode bindings.
    fn clear_keymap(&self) -> Result<(), IoError>;

    /// Enter streaming mode: every event goes to `handler` verbatim.
    fn set_streaming(&self, handler: StreamHandler) -> Result<(), IoError>;

    /// Leave streaming mode, falling back to keymap mode.
    fn remove_streaming(&self) -> Result<(), IoError>;

    /// Start (or restart) event delivery.
    fn listen(&self) -> Result<(), IoError>;

    /// Halt event delivery.
    fn stop_listen(&self) -> Result<(), IoError>;
}

/// An attachable input endpoint multiplexing the shared dispatcher.
///
/// # Contract
///
/// - While detached, configuration calls must succeed locally (recorded),
///   never reprogramming the dispatcher.
/// - `attach` pushes the recorded keymap/streaming/listen state onto the
///   dispatcher; a failed push leaves the port detached.
/// - `detach` is infallible.
pub trait InputPort: InputControl {
    /// Connect this port and program the dispatcher with its recorded state.
    fn attach(&self) -> Result<(), IoError>;

    /// Disconnect from the dispatcher.
    fn detach(&self);
}

/// Where drivers deliver raw key events.
///
/// A cheap cloneable handle onto the dispatch queue; safe to call from any
/// driver thread.
pub trait EventSink: Send + Sync {
    /// Enqueue one event for ordered dispatch.
    fn send(&self, event: InputEvent);
}

/// A physical (or emulated) key source.
///
/// `start` hands the driver its sink and begins emission from the driver's
/// own thread; `stop` halts emission. Both are called by the dispatcher only,
/// under its own serialization — implementations need not guard against
/// concurrent starts.
pub trait InputDriver: Send + Sync {
    /// Begin emitting key events into `sink`.
    fn start(&self, sink: Arc<dyn EventSink>) -> Result<(), IoError>;

    /// Stop emitting key events.
    fn stop(&self) -> Result<(), IoError>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::event::keys;

    #[test]
    fn nullary_binding_ignores_event_payload() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let binding = KeyBinding::nullary(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        binding.invoke(&InputEvent::new(keys::KEY_ENTER));
        binding.invoke(&InputEvent::new(keys::KEY_LEFT));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unary_binding_sees_the_event() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let binding = KeyBinding::unary(move |ev: &InputEvent| {
            sink.lock().unwrap().push(ev.key.clone());
        });

        binding.invoke(&InputEvent::new(keys::KEY_UP));
        assert_eq!(*seen.lock().unwrap(), vec![keys::KEY_UP.to_string()]);
    }

    #[test]
    fn bindings_clone_shares_the_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let binding = KeyBinding::nullary(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let clone = binding.clone();

        binding.invoke(&InputEvent::new(keys::KEY_1));
        clone.invoke(&InputEvent::new(keys::KEY_2));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
