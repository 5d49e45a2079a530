#![forbid(unsafe_code)]

//! Core: input events, key names, frame payloads, and the capability traits
//! shared by hardware drivers, multiplexing ports, and the runtime.

pub mod error;
pub mod event;
pub mod frame;
pub mod io;

pub use error::IoError;
pub use event::{InputEvent, KeyState, keys};
pub use frame::{MonoImage, ScreenFrame};
pub use io::{
    EventSink, InputControl, InputDriver, InputPort, KeyBinding, Keymap, OutputDevice, OutputPort,
    StreamHandler,
};
