//! `pybox-hostapi` — host-side handler registry types and engine configuration.
//!
//! This crate defines the interface the engine facade implements when
//! running the guest:
//!
//! - `HostError` — host-side error type with `ErrorCode` conversion
//! - `Handler` / `HandlerFn` — the native callback shape registered against
//!   a handle, mirroring the guest's notion of a tool call
//! - `EngineConfig` — resource limits and filesystem exposure for one
//!   engine instance

pub mod config;
pub mod error;
pub mod handler;

pub use config::EngineConfig;
pub use error::HostError;
pub use handler::{Handler, HandlerFn, HandlerOutcome};
