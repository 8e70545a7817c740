//! Sandbox error types.

use pybox_hostapi::HostError;

/// Top-level error type for the sandbox crate.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// Module validation failed (missing exports, bad imports, etc.).
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Host-side error surfaced during a guest call.
    #[error("host error: {0}")]
    HostError(#[from] HostError),

    /// Guest returned non-zero from `pybox_init`.
    #[error("pybox_init failed with code {0}")]
    InitFailed(i32),

    /// A guest ABI call returned a non-zero, non-escape status.
    #[error("guest call failed with code {0}")]
    CallFailed(i32),

    /// A registered handler asked to abort the enclosing `exec` call. The
    /// payload is the value passed to [`pybox_hostapi::HandlerOutcome::Escape`].
    #[error("guest execution was escaped by a handler")]
    HostEscape(Box<dyn std::any::Any + Send>),

    /// Response deserialization failed.
    #[error("response error: {0}")]
    ResponseError(String),

    /// Memory operation failed (out-of-bounds, grow failure).
    #[error("memory error: {0}")]
    MemoryError(String),

    /// Fuel exhausted during execution.
    #[error("fuel exhausted (instruction limit)")]
    FuelExhausted,

    /// WASM guest trapped.
    #[error("guest trapped: {0}")]
    GuestTrapped(String),

    /// A snapshot checkpoint index was out of range.
    #[error("checkpoint index {0} is out of range (have {1})")]
    CheckpointOutOfRange(i64, usize),
}
