//! Captured stdout/stderr for the duration of one `pybox_exec` call.
//!
//! `rustpython-vm` writes to whatever `sys.stdout`/`sys.stderr` point at;
//! we swap in a minimal writer object backed by a shared buffer so the
//! guest never touches the real WASI stdio, and the captured text comes
//! back to the host as part of the exec response.

use std::cell::RefCell;
use std::rc::Rc;

use rustpython_vm::builtins::PyStr;
use rustpython_vm::function::FuncArgs;
use rustpython_vm::{PyObjectRef, PyResult, VirtualMachine};

pub type OutputBuffer = Rc<RefCell<String>>;

/// Replace `sys.stdout` and `sys.stderr` with writer objects that append to
/// `buffer`. Returns the buffer so the caller can drain it after running
/// code.
pub fn install_output_capture(vm: &VirtualMachine, buffer: OutputBuffer) -> PyResult<()> {
    let sys_module = vm.import("sys", 0)?;
    let stdout = build_writer(vm, buffer.clone());
    let stderr = build_writer(vm, buffer);
    sys_module.set_attr("stdout", stdout, vm)?;
    sys_module.set_attr("stderr", stderr, vm)?;
    Ok(())
}

fn build_writer(vm: &VirtualMachine, buffer: OutputBuffer) -> PyObjectRef {
    let writer = vm.new_module("<pybox-capture>", vm.ctx.new_dict(), None);

    let write_buffer = buffer.clone();
    let write = vm.new_function("write", move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<usize> {
        let text = args
            .args
            .first()
            .and_then(|obj| obj.downcast_ref::<PyStr>())
            .map(|s| s.as_str().to_owned())
            .ok_or_else(|| vm.new_type_error("write() argument must be str".to_owned()))?;
        write_buffer.borrow_mut().push_str(&text);
        Ok(text.len())
    });
    let flush = vm.new_function("flush", |_args: FuncArgs, vm: &VirtualMachine| vm.ctx.none());

    writer.set_attr("write", write, vm).ok();
    writer.set_attr("flush", flush, vm).ok();
    writer.set_attr("closed", vm.ctx.new_bool(false), vm).ok();
    writer
        .set_attr("encoding", vm.ctx.new_str("utf-8"), vm)
        .ok();
    writer
}
