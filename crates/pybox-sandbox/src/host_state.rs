//! Per-instance mutable state held in the Wasmtime `Store`.
//!
//! Unlike a block-execution sandbox, this `HostState` lives for the entire
//! lifetime of the guest instance, not for a single call: the handler
//! registry and the escape flag must survive across every `exec`,
//! `assign`, `protect`, and snapshot restore the engine facade performs.

use std::collections::HashMap;

use pybox_hostapi::Handler;
use pybox_primitives::HandlerId;
use wasmtime_wasi::{WasiCtx, WasiCtxBuilder, WasiView};

use crate::memory::HostAllocator;

/// Bookkeeping for one in-flight `pybox_json_rpc` call, tracked so a
/// nested (reentrant) call from inside a handler can be told apart from
/// the outermost one when deciding whether to re-enter `enter_guest`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallDepth(pub u32);

/// Per-instance state held in the Wasmtime `Store` for the life of one
/// guest instance.
pub struct HostState {
    /// Handlers registered against a dense handle, in registration order.
    /// `None` marks a handle that was unregistered (tombstoned rather than
    /// reused, so a guest stub holding a stale handle fails cleanly).
    pub handlers: Vec<Option<Box<dyn Handler>>>,
    /// Host-side bump allocator for guest memory (see [`HostAllocator`]).
    pub host_alloc: HostAllocator,
    /// Set by a handler that wants to abort the enclosing `exec` call.
    /// Checked by the runtime immediately after every guest ABI call
    /// returns, and cleared once consumed.
    pub pending_escape: Option<Box<dyn std::any::Any + Send>>,
    /// How many `pybox_json_rpc` calls are currently on the stack. Used to
    /// distinguish the outermost guest entry from a reentrant nested call
    /// made by a handler.
    pub call_depth: CallDepth,
    /// Whether the guest's debug log host call is honored.
    pub enable_guest_logs: bool,
    wasi_ctx: WasiCtx,
    wasi_table: wasmtime_wasi::ResourceTable,
}

impl HostState {
    pub fn new(wasi_ctx: WasiCtx, enable_guest_logs: bool) -> Self {
        Self {
            handlers: Vec::new(),
            host_alloc: HostAllocator::new(0, 0),
            pending_escape: None,
            call_depth: CallDepth::default(),
            enable_guest_logs,
            wasi_ctx,
            wasi_table: wasmtime_wasi::ResourceTable::new(),
        }
    }

    /// Register a handler, returning its dense handle.
    pub fn register(&mut self, handler: Box<dyn Handler>) -> HandlerId {
        let handle = self.handlers.len() as HandlerId;
        self.handlers.push(Some(handler));
        handle
    }

    /// Tombstone a handle so future calls to it fail with `Unknown`.
    pub fn unregister(&mut self, handle: HandlerId) -> bool {
        match self.handlers.get_mut(handle as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                true
            }
            _ => false,
        }
    }
}

/// Build a minimal `WasiCtx` exposing only the configured preopened
/// directories, matching the `EngineConfig` guest-path -> host-path map.
pub fn build_wasi_ctx(
    preopened_dirs: &std::collections::HashMap<String, std::path::PathBuf>,
) -> anyhow::Result<WasiCtx> {
    let mut builder = WasiCtxBuilder::new();
    builder.inherit_stdio();
    for (guest_path, host_path) in preopened_dirs {
        builder.preopened_dir(
            host_path,
            guest_path,
            wasmtime_wasi::DirPerms::all(),
            wasmtime_wasi::FilePerms::all(),
        )?;
    }
    Ok(builder.build())
}

impl WasiView for HostState {
    fn ctx(&mut self) -> &mut WasiCtx {
        &mut self.wasi_ctx
    }
}

impl wasmtime_wasi::IoView for HostState {
    fn table(&mut self) -> &mut wasmtime_wasi::ResourceTable {
        &mut self.wasi_table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pybox_hostapi::{HandlerFn, HandlerOutcome};
    use serde_json::json;

    fn empty_state() -> HostState {
        HostState::new(WasiCtxBuilder::new().build(), true)
    }

    #[test]
    fn register_assigns_dense_handles() {
        let mut state = empty_state();
        let h0 = state.register(Box::new(HandlerFn(|_a, _k| {
            HandlerOutcome::Result(json!(null))
        })));
        let h1 = state.register(Box::new(HandlerFn(|_a, _k| {
            HandlerOutcome::Result(json!(null))
        })));
        assert_eq!(h0, 0);
        assert_eq!(h1, 1);
    }

    #[test]
    fn unregister_tombstones_without_reuse() {
        let mut state = empty_state();
        let h0 = state.register(Box::new(HandlerFn(|_a, _k| {
            HandlerOutcome::Result(json!(null))
        })));
        assert!(state.unregister(h0));
        assert!(state.handlers[h0 as usize].is_none());
        let h1 = state.register(Box::new(HandlerFn(|_a, _k| {
            HandlerOutcome::Result(json!(null))
        })));
        assert_ne!(h1, h0, "handles must not be reused after unregister");
    }
}
