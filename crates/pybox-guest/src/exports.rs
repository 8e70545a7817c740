//! The guest ABI: the `#[no_mangle] extern "C"` functions the host calls
//! directly through `wasmtime`.
//!
//! String arguments (context ids, names, source code) are passed as a
//! single pointer to a NUL-terminated UTF-8 buffer the host wrote into
//! guest memory via [`pybox_alloc`]. `pybox_assign`'s value and
//! `pybox_exec`'s response use an explicit `(ptr, len)` pair instead,
//! since they carry arbitrary bytes rather than a single C string.
//!
//! Every export is wrapped in `catch_unwind` - a panic unwinding across
//! the `extern "C"` boundary is undefined behavior, and host-escape is
//! already handled below the panic boundary as an ordinary `Err` return.

use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::ffi::CStr;
use std::panic::{self, AssertUnwindSafe};

use pybox_primitives::types::API_VERSION;
use pybox_primitives::ErrorCode;
use rustpython_vm::{Interpreter, Settings};

use crate::context::{ContextError, ContextRegistry};
use crate::convert::json_to_py;
use crate::evaluator::{self, EvalError};
use crate::rpc::make_handler_stub;

const STUB_MARKER_KEY: &str = "__pybox_stub__";

thread_local! {
    static STATE: RefCell<Option<GuestState>> = RefCell::new(None);
}

struct GuestState {
    interp: Interpreter,
    registry: ContextRegistry,
}

fn with_state<R>(f: impl FnOnce(&mut GuestState) -> R) -> Option<R> {
    STATE.with(|cell| cell.borrow_mut().as_mut().map(f))
}

/// Initialize the interpreter and context registry. Must be called once
/// before any other export.
#[no_mangle]
pub extern "C" fn pybox_init() -> i32 {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let settings = Settings::default();
        let interp = Interpreter::with_init(settings, |vm| {
            vm.add_native_modules(rustpython_stdlib::get_module_inits());
        });
        STATE.with(|cell| {
            *cell.borrow_mut() = Some(GuestState {
                interp,
                registry: ContextRegistry::new(),
            });
        });
        let _ = API_VERSION;
        ErrorCode::Ok as i32
    }));
    result.unwrap_or(ErrorCode::Internal as i32)
}

/// Allocate `size` bytes in the guest's own heap and return a pointer the
/// host can write into. The allocation is leaked until a matching
/// [`pybox_free`] call.
#[no_mangle]
pub extern "C" fn pybox_alloc(size: i32) -> i32 {
    if size <= 0 {
        return 0;
    }
    panic::catch_unwind(|| {
        let mut buf: Vec<u8> = Vec::with_capacity(size as usize);
        let ptr = buf.as_mut_ptr();
        std::mem::forget(buf);
        ptr as i32
    })
    .unwrap_or(0)
}

/// Release a buffer previously returned by [`pybox_alloc`] or produced by
/// [`pybox_exec`].
#[no_mangle]
pub extern "C" fn pybox_free(ptr: i32, len: i32) {
    if ptr == 0 || len <= 0 {
        return;
    }
    let _ = panic::catch_unwind(|| unsafe {
        let layout = Layout::from_size_align(len as usize, 1).expect("valid free layout");
        alloc::dealloc(ptr as *mut u8, layout);
    });
}

#[no_mangle]
pub extern "C" fn pybox_init_local(id_ptr: i32) -> i32 {
    run_guarded(|| {
        let id = read_cstr(id_ptr)?;
        with_state(|state| state.registry.init_local(&id))
            .ok_or(ErrorCode::Internal)?
            .map_err(context_error_code)
    })
}

#[no_mangle]
pub extern "C" fn pybox_init_local_from(child_ptr: i32, parent_ptr: i32) -> i32 {
    run_guarded(|| {
        let child = read_cstr(child_ptr)?;
        let parent = read_cstr(parent_ptr)?;
        with_state(|state| state.registry.init_local_from(&child, &parent))
            .ok_or(ErrorCode::Internal)?
            .map_err(context_error_code)
    })
}

#[no_mangle]
pub extern "C" fn pybox_protect(id_ptr: i32, name_ptr: i32) -> i32 {
    run_guarded(|| {
        let id = read_cstr(id_ptr)?;
        let name = read_cstr(name_ptr)?;
        with_state(|state| state.registry.protect(&id, &name))
            .ok_or(ErrorCode::Internal)?
            .map_err(context_error_code)
    })
}

#[no_mangle]
pub extern "C" fn pybox_assign(id_ptr: i32, name_ptr: i32, value_ptr: i32, value_len: i32) -> i32 {
    run_guarded(|| {
        let id = read_cstr(id_ptr)?;
        let name = read_cstr(name_ptr)?;
        if value_ptr == 0 || value_len <= 0 {
            return Err(ErrorCode::BadPointer);
        }
        let bytes = unsafe { std::slice::from_raw_parts(value_ptr as *const u8, value_len as usize) };
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|_| ErrorCode::InvalidEncoding)?;

        with_state(|state| {
            let handle = value
                .as_object()
                .and_then(|obj| obj.get(STUB_MARKER_KEY))
                .and_then(|v| v.as_i64());

            state.interp.enter(|vm| {
                let obj = match handle {
                    Some(handle) => make_handler_stub(vm, handle as i32),
                    None => json_to_py(vm, &value),
                };
                state.registry.assign(&id, &name, obj)
            })
        })
        .ok_or(ErrorCode::Internal)?
        .map_err(context_error_code)
    })
}

#[no_mangle]
pub extern "C" fn pybox_exec(id_ptr: i32, code_ptr: i32, out_ptr: i32) -> i32 {
    run_guarded(|| {
        let id = read_cstr(id_ptr)?;
        let code = read_cstr(code_ptr)?;
        if out_ptr == 0 {
            return Err(ErrorCode::BadPointer);
        }

        let body = with_state(|state| evaluator::run(&state.interp, &mut state.registry, &id, &code))
            .ok_or(ErrorCode::Internal)?
            .map_err(|err| match err {
                EvalError::UnknownContext => ErrorCode::Unknown,
                EvalError::Internal => ErrorCode::Internal,
            })?;

        let mut bytes = body.into_bytes();
        bytes.shrink_to_fit();
        let len = bytes.len() as i32;
        let ptr = bytes.as_mut_ptr() as i32;
        std::mem::forget(bytes);

        unsafe {
            std::ptr::write((out_ptr) as *mut i32, ptr);
            std::ptr::write((out_ptr + 4) as *mut i32, len);
        }
        Ok(())
    })
}

fn run_guarded(f: impl FnOnce() -> Result<(), ErrorCode>) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => ErrorCode::Ok as i32,
        Ok(Err(code)) => code as i32,
        Err(_) => ErrorCode::Internal as i32,
    }
}

fn read_cstr(ptr: i32) -> Result<String, ErrorCode> {
    if ptr == 0 {
        return Err(ErrorCode::BadPointer);
    }
    let cstr = unsafe { CStr::from_ptr(ptr as *const i8) };
    cstr.to_str()
        .map(str::to_owned)
        .map_err(|_| ErrorCode::InvalidEncoding)
}

fn context_error_code(err: ContextError) -> ErrorCode {
    match err {
        ContextError::AlreadyExists => ErrorCode::AlreadyExists,
        ContextError::Unknown => ErrorCode::Unknown,
        ContextError::Cycle => ErrorCode::Cycle,
    }
}
