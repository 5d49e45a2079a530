#![forbid(unsafe_code)]

//! Device-level error type shared by drivers, screens, and ports.

use thiserror::Error;

/// Errors surfaced by hardware devices and the port layer.
///
/// Attach failures wrap into the runtime's `ContextError` at the switching
/// layer; everything below the manager speaks `IoError`.
#[derive(Debug, Error)]
pub enum IoError {
    /// The underlying device rejected or failed an operation.
    #[error("device failure: {0}")]
    Device(String),

    /// A global key binding already exists for this key name.
    #[error("global binding already registered for `{0}`")]
    GlobalKeyTaken(String),

    /// A monochrome image payload does not match its declared dimensions.
    #[error("image {width}x{height} needs {expected} bytes, got {got}")]
    InvalidImage {
        /// Declared width in pixels.
        width: u32,
        /// Declared height in pixels.
        height: u32,
        /// Byte length implied by the dimensions.
        expected: usize,
        /// Byte length actually supplied.
        got: usize,
    },
}

impl IoError {
    /// Shorthand for a device failure with a formatted reason.
    pub fn device(reason: impl Into<String>) -> Self {
        Self::Device(reason.into())
    }
}
