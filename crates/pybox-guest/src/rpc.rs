//! The dispatch-bridge client: turns a call against a handler stub into a
//! `pybox_json_rpc` round trip, and turns the response back into a Python
//! value, a raised exception, or a host-escape unwind.

use pybox_primitives::codec::{RpcRequest, RpcResponse};
use rustpython_vm::builtins::PyBaseExceptionRef;
use rustpython_vm::function::FuncArgs;
use rustpython_vm::{PyObjectRef, PyResult, VirtualMachine};

use crate::convert::{json_to_py, py_to_json};
use crate::imports::pybox_json_rpc;

/// Marker argument `SystemExit` is raised with when a handler requested the
/// host-escape path. Checked by identity-of-contents in
/// [`is_host_escape`], not by message text alone, to keep this from ever
/// matching a guest script's own `SystemExit`.
const ESCAPE_MARKER: &str = "__pybox_host_escape__";

/// Build a native-backed Python callable for `handle` that, when called,
/// performs the JSON round trip over `pybox_json_rpc`.
pub fn make_handler_stub(vm: &VirtualMachine, handle: i32) -> PyObjectRef {
    vm.new_function(
        "pybox_handler",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> { call_handler(vm, handle, args) },
    )
    .into()
}

fn call_handler(vm: &VirtualMachine, handle: i32, args: FuncArgs) -> PyResult<PyObjectRef> {
    let positional = args
        .args
        .iter()
        .map(|obj| py_to_json(vm, obj))
        .collect::<PyResult<Vec<_>>>()?;
    let mut kwargs = serde_json::Map::new();
    for (key, value) in args.kwargs {
        kwargs.insert(key, py_to_json(vm, &value)?);
    }
    let request = RpcRequest {
        args: positional,
        kwargs,
    };
    let request_bytes =
        serde_json::to_vec(&request).map_err(|e| vm.new_value_error(e.to_string()))?;

    let request_ptr = request_bytes.as_ptr() as i32;
    let request_len = request_bytes.len() as i32;
    let mut response_ptr: i32 = 0;
    let mut response_len: i32 = 0;

    let status = unsafe {
        pybox_json_rpc(
            handle,
            request_ptr,
            request_len,
            &mut response_ptr as *mut i32 as i32,
            &mut response_len as *mut i32 as i32,
        )
    };
    drop(request_bytes);

    match status {
        0 => {
            let body = take_response_bytes(response_ptr, response_len);
            let response: RpcResponse =
                serde_json::from_slice(&body).map_err(|e| vm.new_value_error(e.to_string()))?;
            match response {
                RpcResponse::Result { result } => Ok(json_to_py(vm, &result)),
                RpcResponse::Exception { exception } => Err(vm.new_runtime_error(exception)),
            }
        }
        1 => Err(vm.new_runtime_error(format!("no handler registered for handle {handle}"))),
        2 => {
            let body = take_response_bytes(response_ptr, response_len);
            let response: RpcResponse =
                serde_json::from_slice(&body).map_err(|e| vm.new_value_error(e.to_string()))?;
            let message = match response {
                RpcResponse::Exception { exception } => exception,
                RpcResponse::Result { .. } => "handler raised an exception".to_owned(),
            };
            Err(vm.new_runtime_error(message))
        }
        3 => Err(raise_host_escape(vm)),
        other => Err(vm.new_runtime_error(format!("unknown dispatch-bridge status {other}"))),
    }
}

/// Copy the response bytes the host wrote into our own linear memory.
/// The bytes live in the host's bump-allocator region (reserved once at
/// instantiate time and never reclaimed - see `pybox-sandbox`'s
/// `HostAllocator`), not in anything the guest's own allocator handed
/// out, so there is nothing here for the guest to free.
fn take_response_bytes(ptr: i32, len: i32) -> Vec<u8> {
    if ptr == 0 || len == 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(ptr as *const u8, len as usize).to_vec() }
}

/// Raise the uncatchable host-escape signal. `SystemExit` derives from
/// `BaseException`, not `Exception`, so guest code that does `except
/// Exception:` can't swallow it - the same trick CPython itself relies on
/// for interpreter-level exits.
fn raise_host_escape(vm: &VirtualMachine) -> PyBaseExceptionRef {
    let exc_type = vm.ctx.exceptions.system_exit.to_owned();
    vm.new_exception_msg(exc_type, ESCAPE_MARKER.to_owned())
}

pub fn is_host_escape(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> bool {
    if !exc
        .class()
        .is(vm.ctx.exceptions.system_exit.as_ref().into())
    {
        return false;
    }
    exc.args()
        .as_slice()
        .first()
        .and_then(|arg| arg.str(vm).ok())
        .map(|s| s.as_str() == ESCAPE_MARKER)
        .unwrap_or(false)
}
