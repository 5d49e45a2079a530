#![forbid(unsafe_code)]

//! The runtime's error type.

use candybar_core::IoError;
use thiserror::Error;

/// Errors surfaced by the context runtime.
///
/// I/O-attach failures (`Io`) and activation failures (`Configuration`)
/// are recoverable at the switching layer via the rollback cascade; the
/// remaining variants are request-level misuse or lifecycle states.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A threaded context has no target to run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A device or port operation failed.
    #[error(transparent)]
    Io(#[from] IoError),

    /// The named context was never created.
    #[error("unknown context `{0}`")]
    UnknownContext(String),

    /// A context with this name already exists; the contexts map is
    /// append-only.
    #[error("context `{0}` already registered")]
    DuplicateContext(String),

    /// The configured fallback context is absent or itself misconfigured.
    /// Switching is refused outright rather than risking a dead end.
    #[error("fallback context `{0}` is missing or misconfigured")]
    FallbackMissing(String),

    /// The manager is tearing down; no new work is accepted.
    #[error("runtime is shutting down")]
    ShuttingDown,

    /// The manager behind this handle has been dropped.
    #[error("context manager no longer exists")]
    RuntimeGone,
}
