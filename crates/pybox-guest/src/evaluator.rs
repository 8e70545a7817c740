//! Ties the context manager, output capture, and dispatch-bridge client
//! together to run one `pybox_exec` call end to end.

use std::collections::HashMap;

use rustpython_vm::builtins::PyDictRef;
use rustpython_vm::compiler::Mode;
use rustpython_vm::scope::Scope;
use rustpython_vm::{AsObject, Interpreter, PyObjectRef, PyResult};

use crate::context::{ContextError, ContextRegistry};
use crate::output::{install_output_capture, OutputBuffer};
use crate::rpc::is_host_escape;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    UnknownContext,
    Internal,
}

impl From<ContextError> for EvalError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Unknown => EvalError::UnknownContext,
            ContextError::AlreadyExists | ContextError::Cycle => EvalError::Internal,
        }
    }
}

/// Run `code` against context `id`'s flattened namespace and return the
/// captured stdout/stderr plus any traceback text, as the single string the
/// `pybox_exec` response carries.
///
/// On a host-escape unwind this returns `Ok` with whatever output was
/// captured before the escape - the real escape payload already landed in
/// `HostState::pending_escape` on the host side, synchronously, before the
/// guest ever got control back, so nothing further needs to travel in the
/// response body.
pub fn run(interp: &Interpreter, registry: &mut ContextRegistry, id: &str, code: &str) -> Result<String, EvalError> {
    let snapshot = registry.flatten(id)?;

    let result = interp.enter(|vm| -> PyResult<String> {
        let output: OutputBuffer = Default::default();
        install_output_capture(vm, output.clone())?;

        let globals = vm.ctx.new_dict();
        for (name, value) in &snapshot {
            globals.set_item(name.as_str(), value.clone(), vm)?;
        }

        let scope = Scope::with_builtins(None, globals.clone(), vm);

        let mut body = String::new();
        let exec_result = match vm.compile(code, Mode::Exec, "<pybox>".to_owned()) {
            Ok(code_obj) => vm.run_code_obj(code_obj, scope),
            Err(err) => Err(vm.new_syntax_error(&err, Some(code))),
        };

        match exec_result {
            Ok(_) => {
                let diagnostics = reconcile_globals(registry, id, &globals, &snapshot, vm)?;
                for message in diagnostics {
                    body.push_str(&message);
                    body.push('\n');
                }
            }
            Err(exc) => {
                if is_host_escape(vm, &exc) {
                    // Globals as they stood at the moment of escape are
                    // discarded; the context only observes committed state
                    // from completed execs.
                } else {
                    let mut traceback = String::new();
                    vm.write_exception(&mut traceback, &exc)
                        .map_err(|_| vm.new_runtime_error("failed to format traceback".to_owned()))?;
                    body.push_str(&traceback);
                }
            }
        }

        body.push_str(&output.borrow());
        Ok(body)
    });

    result.map_err(|_exc| EvalError::Internal)
}

/// Diff `globals` against the pre-exec `snapshot`: any name whose identity
/// changed, and that the context chain protects, is reverted in `globals`
/// and produces a `Cannot modify protected <name>` diagnostic; everything
/// else that changed is committed into the context's own locals. A
/// protected name the code `del`eted is restored the same way.
fn reconcile_globals(
    registry: &mut ContextRegistry,
    id: &str,
    globals: &PyDictRef,
    snapshot: &HashMap<String, PyObjectRef>,
    vm: &rustpython_vm::VirtualMachine,
) -> PyResult<Vec<String>> {
    let mut diagnostics = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (key, value) in globals {
        let Some(name) = key.str(vm).ok().map(|s| s.as_str().to_owned()) else {
            continue;
        };
        seen.insert(name.clone());

        let unchanged = snapshot.get(&name).map(|prev| prev.is(&value)).unwrap_or(false);
        if unchanged {
            continue;
        }
        if registry.is_protected(id, &name) {
            diagnostics.push(format!("Cannot modify protected {name}"));
            if let Some(prev) = snapshot.get(&name) {
                globals.set_item(name.as_str(), prev.clone(), vm)?;
            } else {
                globals.del_item(name.as_str(), vm)?;
            }
            continue;
        }
        registry
            .assign(id, &name, value.clone())
            .map_err(|_| vm.new_runtime_error("context vanished mid-exec".to_owned()))?;
    }

    for name in snapshot.keys() {
        if seen.contains(name) {
            continue;
        }
        // The name was `del`eted from globals entirely. Only a protected
        // name's disappearance is worth reverting and reporting; an
        // ordinary name's deletion isn't tracked as a context mutation.
        if registry.is_protected(id, name) {
            diagnostics.push(format!("Cannot modify protected {name}"));
            globals.set_item(name.as_str(), snapshot[name].clone(), vm)?;
        }
    }

    Ok(diagnostics)
}
