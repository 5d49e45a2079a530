#![forbid(unsafe_code)]

//! Candybar public facade crate.
//!
//! This crate provides the stable surface area for applications and
//! platform glue. It re-exports the common types from the internal crates
//! and offers a lightweight prelude for day-to-day usage.

// --- Core re-exports -------------------------------------------------------

pub use candybar_core::event::{InputEvent, KeyState, keys};
pub use candybar_core::frame::{MonoImage, ScreenFrame};
pub use candybar_core::io::{
    EventSink, InputControl, InputDriver, InputPort, KeyBinding, Keymap, OutputDevice, OutputPort,
    StreamHandler,
};
pub use candybar_core::IoError;

// --- Runtime re-exports ----------------------------------------------------

pub use candybar_runtime::{
    Action, ActionFlags, ActionKind, ActionLabel, ActionSpec, ContextError, ContextHandle,
    ContextManager, ContextSnapshot, ContextState, ContextTarget, DispatchConfig, EventQueue,
    InputDispatcher, InputProxy, InputSink, Latch, ManagerConfig, OutputProxy, TargetOutcome,
};

/// Standard result type for candybar APIs.
pub type Result<T, E = ContextError> = std::result::Result<T, E>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        ActionKind, ActionSpec, ContextError, ContextHandle, ContextManager, DispatchConfig,
        InputDispatcher, InputEvent, KeyBinding, KeyState, Keymap, Latch, ManagerConfig,
        MonoImage, Result, ScreenFrame, TargetOutcome, keys,
    };

    pub use crate::{core, runtime};
}

pub use candybar_core as core;
pub use candybar_runtime as runtime;
