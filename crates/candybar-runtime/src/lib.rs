#![forbid(unsafe_code)]

//! The candybar control core: context switching, input dispatch, and the
//! action registry.
//!
//! Construction order mirrors the hardware: wrap the physical keypad
//! driver in an [`InputDispatcher`], hand it and the screen to a
//! [`ContextManager`], create contexts, then switch to the start context.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use candybar_runtime::*;
//! # fn demo(screen: Arc<dyn candybar_core::OutputDevice>,
//! #         driver: Arc<dyn candybar_core::InputDriver>) -> Result<(), ContextError> {
//! let dispatcher = InputDispatcher::new(driver, DispatchConfig::default());
//! let manager = ContextManager::new(screen, dispatcher, ManagerConfig::new("main"));
//! let main = manager.create_context("main", false)?;
//! let clock = manager.create_context("clock", true)?;
//! clock.set_target(|stop| {
//!     // draw, bind keys, then wait to be told to go away
//!     stop.wait_timeout(std::time::Duration::MAX);
//!     TargetOutcome::Finished
//! })?;
//! manager.switch_to_context("main", true)?;
//! # Ok(()) }
//! ```

pub mod actions;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod latch;
pub mod manager;
pub mod proxy;
pub mod queue;

pub use actions::{
    Action, ActionCallback, ActionFlags, ActionKind, ActionLabel, ActionRegistry, ActionSpec,
    FULL_NAME_DELIMITER,
};
pub use context::{ContextHandle, ContextSnapshot, ContextState, ContextTarget, TargetOutcome};
pub use dispatch::{DispatchConfig, InputDispatcher};
pub use error::ContextError;
pub use latch::Latch;
pub use manager::{ContextEvent, ContextManager, EventReply, ManagerConfig};
pub use proxy::{InputProxy, OutputProxy};
pub use queue::{EventQueue, InputSink};
