//! Host function registration via the Wasmtime linker.
//!
//! Registers the single `pybox_host::pybox_json_rpc` import. Its shape
//! mirrors the teacher's per-op registrations (extract memory from the
//! `Caller`, bounds-check pointers, perform the operation, write the
//! result back, return an `i32` status) collapsed onto one call that
//! dispatches internally by handle.

use wasmtime::{Caller, Linker, Memory};

use pybox_hostapi::HandlerOutcome;
use pybox_primitives::codec::{RpcRequest, RpcResponse};

use crate::error::SandboxError;
use crate::host_state::HostState;
use crate::memory;

/// The four `pybox_json_rpc` status codes. Unlike [`pybox_primitives::ErrorCode`],
/// which covers the engine facade's own operations, this tiny, fixed
/// vocabulary is the dispatch bridge's wire contract with the guest and
/// must not grow without changing the guest ABI.
const STATUS_OK: i32 = 0;
const STATUS_UNKNOWN_HANDLE: i32 = 1;
const STATUS_HANDLER_EXCEPTION: i32 = 2;
const STATUS_HOST_ESCAPE: i32 = 3;
/// Host-internal failures (bad pointers, malformed JSON) that can only
/// happen from a guest bug, not from normal handler behavior.
const STATUS_HOST_FAULT: i32 = -1;

fn get_memory(caller: &mut Caller<'_, HostState>) -> Option<Memory> {
    caller.get_export("memory").and_then(|e| e.into_memory())
}

pub fn register_json_rpc(linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        "pybox_host",
        "pybox_json_rpc",
        |mut caller: Caller<'_, HostState>,
         handle: i32,
         request_ptr: i32,
         request_len: i32,
         response_ptr_out: i32,
         response_len_out: i32|
         -> i32 {
            let mem = match get_memory(&mut caller) {
                Some(m) => m,
                None => return STATUS_HOST_FAULT,
            };

            let request_bytes = {
                let data = mem.data(&caller);
                match memory::read_bytes(data, request_ptr, request_len) {
                    Ok(b) => b,
                    Err(_) => return STATUS_HOST_FAULT,
                }
            };

            {
                let size = mem.data(&caller).len();
                if memory::validate_range(size, response_ptr_out, 4).is_err()
                    || memory::validate_range(size, response_len_out, 4).is_err()
                {
                    return STATUS_HOST_FAULT;
                }
            }

            if handle < 0 || handle as usize >= caller.data().handlers.len() {
                return STATUS_UNKNOWN_HANDLE;
            }

            let request: RpcRequest = match serde_json::from_slice(&request_bytes) {
                Ok(r) => r,
                Err(_) => return STATUS_HOST_FAULT,
            };

            tracing::trace!(handle, "dispatching handler call");
            caller.data_mut().call_depth.0 += 1;
            let outcome = {
                let state = caller.data_mut();
                match state.handlers[handle as usize].as_mut() {
                    Some(h) => h.call(request.args, request.kwargs),
                    None => {
                        state.call_depth.0 -= 1;
                        return STATUS_UNKNOWN_HANDLE;
                    }
                }
            };
            caller.data_mut().call_depth.0 -= 1;

            let (response, status) = match outcome {
                HandlerOutcome::Result(v) => (RpcResponse::result(v), STATUS_OK),
                HandlerOutcome::Raised(msg) => {
                    tracing::debug!(handle, %msg, "handler raised");
                    (RpcResponse::exception(msg), STATUS_HANDLER_EXCEPTION)
                }
                HandlerOutcome::Escape(payload) => {
                    tracing::debug!(handle, "handler requested host escape");
                    caller.data_mut().pending_escape = Some(payload);
                    return STATUS_HOST_ESCAPE;
                }
            };

            let response_bytes = match serde_json::to_vec(&response) {
                Ok(b) => b,
                Err(_) => return STATUS_HOST_FAULT,
            };

            let (ptr, new_bump, new_cap, grow_pages) =
                caller.data().host_alloc.compute_alloc(response_bytes.len());

            if grow_pages > 0 && mem.grow(&mut caller, grow_pages).is_err() {
                return STATUS_HOST_FAULT;
            }

            {
                let data = mem.data_mut(&mut caller);
                data[ptr..ptr + response_bytes.len()].copy_from_slice(&response_bytes);
                if memory::write_i32(data, response_ptr_out, ptr as i32).is_err()
                    || memory::write_i32(data, response_len_out, response_bytes.len() as i32)
                        .is_err()
                {
                    return STATUS_HOST_FAULT;
                }
            }

            caller.data_mut().host_alloc.commit(new_bump, new_cap);

            status
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_state::build_wasi_ctx;
    use pybox_hostapi::{HandlerFn, HandlerOutcome};
    use serde_json::json;
    use wasmtime::{Engine, Module, Store};

    const WAT_ECHO_GUEST: &str = r#"
        (module
            (import "pybox_host" "pybox_json_rpc"
                (func $rpc (param i32 i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 2)
            (func (export "call_handle0") (param $req_ptr i32) (param $req_len i32) (result i32)
                (local $resp_ptrs i32)
                (local.set $resp_ptrs (i32.const 0))
                (call $rpc
                    (i32.const 0)
                    (local.get $req_ptr)
                    (local.get $req_len)
                    (i32.const 0)
                    (i32.const 4))
            )
        )
    "#;

    #[test]
    fn dispatches_to_registered_handler() {
        let engine = Engine::default();
        let module = Module::new(&engine, WAT_ECHO_GUEST).unwrap();
        let wasi = build_wasi_ctx(&Default::default()).unwrap();
        let mut store = Store::new(&engine, HostState::new(wasi, false));
        store.data_mut().register(Box::new(HandlerFn(|args, _kwargs| {
            HandlerOutcome::Result(json!(args.len()))
        })));
        store.data_mut().host_alloc = crate::memory::HostAllocator::new(65536, 65536);

        let mut linker = Linker::new(&engine);
        register_json_rpc(&mut linker).unwrap();
        let instance = linker.instantiate(&mut store, &module).unwrap();
        let memory = instance.get_memory(&mut store, "memory").unwrap();

        let req = br#"{"args":[1,2,3]}"#;
        memory.data_mut(&mut store)[8..8 + req.len()].copy_from_slice(req);

        let call = instance
            .get_typed_func::<(i32, i32), i32>(&mut store, "call_handle0")
            .unwrap();
        let status = call.call(&mut store, (8, req.len() as i32)).unwrap();
        assert_eq!(status, STATUS_OK);
    }

    #[test]
    fn unknown_handle_reports_status_one() {
        let engine = Engine::default();
        let module = Module::new(&engine, WAT_ECHO_GUEST).unwrap();
        let wasi = build_wasi_ctx(&Default::default()).unwrap();
        let mut store = Store::new(&engine, HostState::new(wasi, false));
        store.data_mut().host_alloc = crate::memory::HostAllocator::new(65536, 65536);

        let mut linker = Linker::new(&engine);
        register_json_rpc(&mut linker).unwrap();
        let instance = linker.instantiate(&mut store, &module).unwrap();
        let memory = instance.get_memory(&mut store, "memory").unwrap();
        let req = b"{}";
        memory.data_mut(&mut store)[8..8 + req.len()].copy_from_slice(req);

        let call = instance
            .get_typed_func::<(i32, i32), i32>(&mut store, "call_handle0")
            .unwrap();
        let status = call.call(&mut store, (8, req.len() as i32)).unwrap();
        assert_eq!(status, STATUS_UNKNOWN_HANDLE);
    }
}
