//! Engine facade — owns one guest instance, the handler registry (inside
//! the guest instance's [`pybox_sandbox::host_state::HostState`]), and the
//! linear-memory snapshot engine, sequencing every operation behind a
//! single reentrant mutex.
//!
//! Reentrancy (§4.B/§5: a handler invoked during `exec` may call back into
//! the same engine on the same thread) rules out a plain `Mutex` or a
//! `RefCell`'s dynamic borrow check — both would deadlock or panic the
//! moment a handler re-enters. Instead this mirrors the
//! `Arc<ReentrantMutex<UnsafeCell<T>>>` pattern used for exactly this
//! shape of problem (a host holding a lock across a call into a guest
//! that may call back into the host) elsewhere in the ecosystem: the
//! reentrant mutex lets the same thread re-acquire the lock, and the
//! `UnsafeCell` sidesteps `RefCell`'s panic-on-reentry because the outer
//! frame never touches the state while a nested call is in flight — it is
//! blocked on the guest call, not racing it.

use std::cell::UnsafeCell;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use serde_json::Value;

pub use pybox_hostapi::{EngineConfig, Handler, HandlerFn, HandlerOutcome};
pub use pybox_primitives::HandlerId;
pub use pybox_sandbox::SandboxError as EngineError;
use pybox_sandbox::{GuestInstance, Sandbox};
pub use pybox_sandbox::snapshot::SnapshotStats;

struct EngineInner {
    guest: GuestInstance,
    snapshots: pybox_sandbox::SnapshotEngine,
}

/// What a [`Engine::capture`] call actually did — constructing the first
/// snapshot captures the base image, every one after that captures a
/// delta against the current checkpoint stack.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Base { memory_size: usize },
    Delta { dirty_blocks: usize, bytes_held: usize },
}

/// The sandboxed Python execution engine's public handle. Cheap to clone
/// — every clone shares the same guest instance behind the reentrant
/// mutex, which is how a registered handler gets to call back into the
/// engine it was registered against.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<ReentrantMutex<UnsafeCell<EngineInner>>>,
}

impl Engine {
    /// Compile, validate, and instantiate the guest module, ready to
    /// accept handler registrations and context operations.
    pub fn new(wasm_bytes: &[u8], config: EngineConfig) -> Result<Self, EngineError> {
        let block_size = config.block_size;
        let sandbox = Sandbox::new(wasm_bytes, config)?;
        let guest = sandbox.instantiate()?;
        let inner = EngineInner {
            guest,
            snapshots: pybox_sandbox::SnapshotEngine::new(block_size),
        };
        Ok(Self {
            inner: Arc::new(ReentrantMutex::new(UnsafeCell::new(inner))),
        })
    }

    pub fn register_handler(&self, handler: impl Handler + 'static) -> HandlerId {
        tracing::trace!("acquiring engine lock: register_handler");
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        let handle = state.guest.register_handler(Box::new(handler));
        tracing::debug!(handle, "registered handler");
        handle
    }

    pub fn unregister_handler(&self, handle: HandlerId) -> bool {
        tracing::trace!(handle, "acquiring engine lock: unregister_handler");
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        state.guest.unregister_handler(handle)
    }

    pub fn init_local(&self, id: &str) -> Result<(), EngineError> {
        tracing::trace!(context = id, "acquiring engine lock: init_local");
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        state.guest.init_local(id)
    }

    pub fn init_local_from(&self, child_id: &str, parent_id: &str) -> Result<(), EngineError> {
        tracing::trace!(child_id, parent_id, "acquiring engine lock: init_local_from");
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        state.guest.init_local_from(child_id, parent_id)
    }

    pub fn protect(&self, id: &str, name: &str) -> Result<(), EngineError> {
        tracing::trace!(context = id, name, "acquiring engine lock: protect");
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        state.guest.protect(id, name)
    }

    pub fn assign(&self, id: &str, name: &str, value: &Value) -> Result<(), EngineError> {
        tracing::trace!(context = id, name, "acquiring engine lock: assign");
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        state.guest.assign(id, name, value)
    }

    /// Evaluate `code` against context `id`, returning captured
    /// stdout/stderr. Reentrant: may be called from inside a handler this
    /// engine dispatched to, on the same thread, while an outer `exec` is
    /// still on the call stack.
    pub fn exec(&self, id: &str, code: &str) -> Result<String, EngineError> {
        tracing::trace!(context = id, "acquiring engine lock: exec");
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        tracing::debug!(context = id, "entering guest for exec");
        let result = state.guest.exec(id, code);
        tracing::debug!(context = id, ok = result.is_ok(), "returned from guest exec");
        result
    }

    /// Capture a snapshot: the base image on the first call, a delta
    /// against the checkpoint stack on every call after.
    pub fn capture(&self, name: Option<String>) -> CaptureOutcome {
        tracing::trace!("acquiring engine lock: capture");
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        if !state.snapshots.has_base() {
            let mem = state.guest.memory_view();
            let size = state
                .snapshots
                .capture_base(mem)
                .expect("has_base() just reported no base image");
            CaptureOutcome::Base { memory_size: size }
        } else {
            let mem_bytes = state.guest.memory_view().to_vec();
            let (dirty_blocks, bytes_held) = state
                .snapshots
                .capture_delta(&mem_bytes, name)
                .expect("base already captured");
            CaptureOutcome::Delta {
                dirty_blocks,
                bytes_held,
            }
        }
    }

    pub fn restore(&self, checkpoint_index: i64) -> Result<(), EngineError> {
        tracing::trace!(checkpoint_index, "acquiring engine lock: restore");
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        let mem = state.guest.memory_view_mut();
        state.snapshots.restore(mem, checkpoint_index)
    }

    pub fn rollback(&self, steps: usize) -> Result<(), EngineError> {
        tracing::trace!(steps, "acquiring engine lock: rollback");
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        let mem = state.guest.memory_view_mut();
        state.snapshots.rollback(mem, steps)
    }

    pub fn clear_checkpoints(&self) {
        tracing::trace!("acquiring engine lock: clear_checkpoints");
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        state.snapshots.clear_checkpoints();
    }

    pub fn snapshot_stats(&self) -> SnapshotStats {
        let guard = self.inner.lock();
        let state = unsafe { &mut *guard.get() };
        state.snapshots.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_wat() -> &'static str {
        r#"
            (module
                (memory (export "memory") 2)
                (func (export "pybox_init") (result i32) i32.const 0)
                (func (export "pybox_alloc") (param i32) (result i32) i32.const 0)
                (func (export "pybox_free") (param i32 i32))
                (func (export "pybox_init_local") (param i32 i32) (result i32) i32.const 0)
                (func (export "pybox_init_local_from") (param i32 i32) (result i32) i32.const 0)
                (func (export "pybox_protect") (param i32 i32) (result i32) i32.const 0)
                (func (export "pybox_assign") (param i32 i32 i32 i32) (result i32) i32.const 0)
                (func (export "pybox_exec") (param i32 i32 i32) (result i32) i32.const 0)
            )
        "#
    }

    #[test]
    fn engine_construction_runs_pybox_init() {
        let engine = Engine::new(minimal_wat().as_bytes(), EngineConfig::default());
        assert!(engine.is_ok());
    }

    #[test]
    fn engine_clone_shares_state() {
        let engine = Engine::new(minimal_wat().as_bytes(), EngineConfig::default()).unwrap();
        let clone = engine.clone();
        let h = engine.register_handler(HandlerFn(|_a, _k| {
            HandlerOutcome::Result(serde_json::json!(null))
        }));
        assert!(clone.unregister_handler(h));
    }
}
