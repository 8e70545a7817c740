//! Sandbox runtime — Wasmtime engine, module loading, and the persistent
//! guest instance.
//!
//! Unlike a block-execution sandbox that instantiates fresh per call, a
//! [`GuestInstance`] here is created once and lives for the engine
//! facade's entire lifetime: contexts, registered handlers, and the
//! snapshot engine's base image all depend on the same linear memory
//! surviving across many `exec` calls.

use std::path::Path;

use serde::Serialize;
use wasmtime::{Config, Engine, Instance, Linker, Memory, Module, Store};

use pybox_hostapi::{EngineConfig, Handler};
use pybox_primitives::{ErrorCode, HandlerId};

use crate::error::SandboxError;
use crate::host_state::{build_wasi_ctx, HostState};
use crate::linker::register_json_rpc;
use crate::memory::{self, HostAllocator, HOST_ALLOC_PAGES};
use crate::validation::validate_module;

/// Compiled, validated guest module plus the configuration used to
/// instantiate it.
pub struct Sandbox {
    engine: Engine,
    module: Module,
    config: EngineConfig,
}

impl Sandbox {
    pub fn new(wasm_bytes: &[u8], config: EngineConfig) -> Result<Self, SandboxError> {
        let engine = create_engine(&config)?;
        let module = Module::new(&engine, wasm_bytes)?;
        validate_module(&module)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    pub fn from_file(path: &Path, config: EngineConfig) -> Result<Self, SandboxError> {
        let engine = create_engine(&config)?;
        let module = Module::from_file(&engine, path)?;
        validate_module(&module)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    /// Instantiate the guest once, running `pybox_init` and setting up the
    /// host-side allocator region. The returned [`GuestInstance`] is meant
    /// to be kept for as long as the engine facade lives.
    pub fn instantiate(&self) -> Result<GuestInstance, SandboxError> {
        let wasi = build_wasi_ctx(&self.config.preopened_dirs)?;
        let mut store = Store::new(&self.engine, HostState::new(wasi, self.config.enable_guest_logs));
        if let Some(fuel) = self.config.fuel_limit {
            store.set_fuel(fuel)?;
        }

        let mut linker = Linker::new(&self.engine);
        wasmtime_wasi::add_to_linker_sync(&mut linker)?;
        register_json_rpc(&mut linker)?;

        let instance = linker.instantiate(&mut store, &self.module)?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| SandboxError::MemoryError("no memory export".into()))?;

        let current_pages = memory.size(&store);
        memory
            .grow(&mut store, HOST_ALLOC_PAGES)
            .map_err(|e| SandboxError::MemoryError(format!("initial grow: {e}")))?;
        let alloc_base = (current_pages as usize) * 65536;
        let alloc_capacity = (HOST_ALLOC_PAGES as usize) * 65536;
        store.data_mut().host_alloc = HostAllocator::new(alloc_base, alloc_capacity);

        let mut guest = GuestInstance {
            store,
            instance,
            memory,
        };

        let init_fn = guest
            .instance
            .get_typed_func::<(), i32>(&mut guest.store, "pybox_init")?;
        let status = guest.call_guest(|store| init_fn.call(store, ()))?;
        if status != ErrorCode::Ok.as_i32() {
            return Err(SandboxError::InitFailed(status));
        }
        tracing::debug!("guest instantiated and pybox_init completed");

        Ok(guest)
    }
}

/// One live guest instance: its `Store`, `Instance`, and `memory` export,
/// plus the typed ABI calls the engine facade drives.
pub struct GuestInstance {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
}

impl GuestInstance {
    pub fn register_handler(&mut self, handler: Box<dyn Handler>) -> HandlerId {
        self.store.data_mut().register(handler)
    }

    pub fn unregister_handler(&mut self, handle: HandlerId) -> bool {
        self.store.data_mut().unregister(handle)
    }

    /// Read-only view of the guest's current linear memory, for the
    /// snapshot engine to hash or capture.
    pub fn memory_view(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    /// Mutable view of the guest's current linear memory, for the
    /// snapshot engine to restore into directly.
    pub fn memory_view_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }

    pub fn init_local(&mut self, id: &str) -> Result<(), SandboxError> {
        let ptr = self.write_cstr(id)?;
        let f = self
            .instance
            .get_typed_func::<i32, i32>(&mut self.store, "pybox_init_local")?;
        let status = self.call_guest(|store| f.call(store, ptr))?;
        status_to_result(status)
    }

    pub fn init_local_from(&mut self, child_id: &str, parent_id: &str) -> Result<(), SandboxError> {
        let child_ptr = self.write_cstr(child_id)?;
        let parent_ptr = self.write_cstr(parent_id)?;
        let f = self
            .instance
            .get_typed_func::<(i32, i32), i32>(&mut self.store, "pybox_init_local_from")?;
        let status = self.call_guest(|store| f.call(store, (child_ptr, parent_ptr)))?;
        status_to_result(status)
    }

    pub fn protect(&mut self, id: &str, name: &str) -> Result<(), SandboxError> {
        let id_ptr = self.write_cstr(id)?;
        let name_ptr = self.write_cstr(name)?;
        let f = self
            .instance
            .get_typed_func::<(i32, i32), i32>(&mut self.store, "pybox_protect")?;
        let status = self.call_guest(|store| f.call(store, (id_ptr, name_ptr)))?;
        status_to_result(status)
    }

    pub fn assign(
        &mut self,
        id: &str,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<(), SandboxError> {
        let id_ptr = self.write_cstr(id)?;
        let name_ptr = self.write_cstr(name)?;
        let (value_ptr, value_len) = self.write_json(value)?;
        let f = self
            .instance
            .get_typed_func::<(i32, i32, i32, i32), i32>(&mut self.store, "pybox_assign")?;
        let status =
            self.call_guest(|store| f.call(store, (id_ptr, name_ptr, value_ptr, value_len)))?;
        status_to_result(status)
    }

    /// Evaluate `code` as a top-level program against context `id`,
    /// returning the captured stdout/stderr text.
    pub fn exec(&mut self, id: &str, code: &str) -> Result<String, SandboxError> {
        tracing::trace!(context = id, "guest exec entry");
        let id_ptr = self.write_cstr(id)?;
        let code_ptr = self.write_cstr(code)?;
        let out_ptr = self.alloc_scratch(8)?;

        let f = self
            .instance
            .get_typed_func::<(i32, i32, i32), i32>(&mut self.store, "pybox_exec")?;
        let status = self.call_guest(|store| f.call(store, (id_ptr, code_ptr, out_ptr)))?;

        if status != ErrorCode::Ok.as_i32() {
            return Err(status_to_result(status).unwrap_err());
        }

        let (resp_ptr, resp_len) = {
            let data = self.memory.data(&self.store);
            let ptr = memory::read_i32(data, out_ptr)
                .map_err(|_| SandboxError::MemoryError("read exec output ptr".into()))?;
            let len = memory::read_i32(data, out_ptr + 4)
                .map_err(|_| SandboxError::MemoryError("read exec output len".into()))?;
            (ptr, len)
        };

        let bytes = {
            let data = self.memory.data(&self.store);
            memory::read_bytes(data, resp_ptr, resp_len)
                .map_err(|_| SandboxError::MemoryError("read exec output bytes".into()))?
        };

        if resp_len > 0 {
            if let Ok(free_fn) = self
                .instance
                .get_typed_func::<(i32, i32), ()>(&mut self.store, "pybox_free")
            {
                let _ = free_fn.call(&mut self.store, (resp_ptr, resp_len));
            }
        }

        let text = String::from_utf8(bytes).map_err(|e| SandboxError::ResponseError(e.to_string()))?;
        tracing::trace!(context = id, output_len = text.len(), "guest exec exit");
        Ok(text)
    }

    fn write_json(&mut self, value: &impl Serialize) -> Result<(i32, i32), SandboxError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| SandboxError::ResponseError(format!("encoding request: {e}")))?;
        let ptr = self.alloc_and_write(&bytes)?;
        Ok((ptr, bytes.len() as i32))
    }

    /// Write a NUL-terminated UTF-8 string into guest memory, for the ABI
    /// exports whose param count only leaves room for a single pointer per
    /// string argument (context ids, names, and source text).
    fn write_cstr(&mut self, s: &str) -> Result<i32, SandboxError> {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.alloc_and_write(&bytes)
    }

    fn alloc_scratch(&mut self, size: usize) -> Result<i32, SandboxError> {
        self.alloc_and_write(&vec![0u8; size])
    }

    fn alloc_and_write(&mut self, data: &[u8]) -> Result<i32, SandboxError> {
        if data.is_empty() {
            return Ok(0);
        }
        let (ptr, new_bump, new_cap, grow_pages) =
            self.store.data().host_alloc.compute_alloc(data.len());
        if grow_pages > 0 {
            self.memory
                .grow(&mut self.store, grow_pages)
                .map_err(|e| SandboxError::MemoryError(format!("alloc grow: {e}")))?;
        }
        self.memory.data_mut(&mut self.store)[ptr..ptr + data.len()].copy_from_slice(data);
        self.store.data_mut().host_alloc.commit(new_bump, new_cap);
        Ok(ptr as i32)
    }

    /// Run a guest typed-func call, translating a trap to [`SandboxError`]
    /// and checking for a pending escape signal left by a handler that ran
    /// during the call (§4.B's `EscapePending` state).
    fn call_guest<R>(
        &mut self,
        call: impl FnOnce(&mut Store<HostState>) -> Result<R, anyhow::Error>,
    ) -> Result<R, SandboxError> {
        let result = handle_trap(call(&mut self.store));
        if let Some(payload) = self.store.data_mut().pending_escape.take() {
            tracing::debug!("propagating pending host escape");
            return Err(SandboxError::HostEscape(payload));
        }
        result
    }
}

fn status_to_result(status: i32) -> Result<(), SandboxError> {
    match ErrorCode::from_i32(status) {
        Some(code) if code.is_ok() => Ok(()),
        _ => Err(SandboxError::CallFailed(status)),
    }
}

fn create_engine(config: &EngineConfig) -> Result<Engine, SandboxError> {
    let mut wasm_config = Config::new();
    wasm_config.consume_fuel(config.fuel_limit.is_some());
    wasm_config.wasm_multi_memory(false);
    let max_bytes = (config.max_memory_pages as u64) * 65536;
    wasm_config.memory_guaranteed_dense_image_size(max_bytes.min(16 * 1024 * 1024));
    Ok(Engine::new(&wasm_config)?)
}

fn handle_trap<R>(result: Result<R, anyhow::Error>) -> Result<R, SandboxError> {
    match result {
        Ok(val) => Ok(val),
        Err(e) => {
            let msg = format!("{e}");
            if msg.contains("fuel") {
                Err(SandboxError::FuelExhausted)
            } else {
                Err(SandboxError::GuestTrapped(msg))
            }
        }
    }
}
