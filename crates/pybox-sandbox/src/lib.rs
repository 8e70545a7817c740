//! `pybox-sandbox` — Wasmtime-based host side of the guest-host dispatch
//! bridge and linear-memory snapshot engine.
//!
//! This crate loads, validates, and drives the pybox guest module inside a
//! Wasmtime sandbox. It provides:
//!
//! - **ABI validation:** required exports and the import whitelist
//!   (`pybox_host::pybox_json_rpc` plus WASI) checked before instantiation
//! - **The dispatch bridge's host half:** [`linker::register_json_rpc`]
//! - **A persistent guest instance:** [`runtime::Sandbox`]/[`runtime::GuestInstance`]
//! - **The snapshot engine:** [`snapshot::SnapshotEngine`]
//!
//! The primary entry points are [`Sandbox::instantiate`] and the resulting
//! [`GuestInstance`].

pub mod error;
pub mod memory;
pub mod host_state;
pub mod validation;
pub mod linker;
pub mod runtime;
pub mod snapshot;

pub use error::SandboxError;
pub use runtime::{GuestInstance, Sandbox};
pub use snapshot::SnapshotEngine;
