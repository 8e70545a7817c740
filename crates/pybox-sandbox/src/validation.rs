//! WASM module validation — ABI compatibility checks.
//!
//! Validates that a compiled guest module meets the expected ABI before
//! the engine will use it:
//!
//! 1. Required exports present with correct signatures
//! 2. Imports are either the single `pybox_host::pybox_json_rpc` call or a
//!    WASI import (the guest needs WASI filesystem access for preopened
//!    directories; unlike a determinism-focused sandbox, nothing here
//!    forbids it)
//! 3. A `memory` export is present

use wasmtime::{ExternType, Module, ValType};

use crate::error::SandboxError;

fn is_i32(vt: &ValType) -> bool {
    matches!(vt, ValType::I32)
}

/// Expected export: (name, param_count_of_i32, result_count_of_i32).
const REQUIRED_EXPORTS: &[(&str, usize, usize)] = &[
    ("pybox_init", 0, 1),
    ("pybox_alloc", 1, 1),
    ("pybox_free", 2, 0),
    ("pybox_init_local", 1, 1),
    ("pybox_init_local_from", 2, 1),
    ("pybox_protect", 2, 1),
    ("pybox_assign", 4, 1),
    ("pybox_exec", 3, 1),
];

const RPC_IMPORT_MODULE: &str = "pybox_host";
const RPC_IMPORT_FUNC: &str = "pybox_json_rpc";

pub fn validate_module(module: &Module) -> Result<(), SandboxError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

fn validate_exports(module: &Module) -> Result<(), SandboxError> {
    let has_memory = module
        .exports()
        .any(|e| e.name() == "memory" && matches!(e.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(SandboxError::ValidationError(
            "module must export 'memory'".into(),
        ));
    }

    for &(name, expected_param_count, expected_result_count) in REQUIRED_EXPORTS {
        let export = module.exports().find(|e| e.name() == name).ok_or_else(|| {
            SandboxError::ValidationError(format!("missing required export: {name}"))
        })?;

        let func_ty = match export.ty() {
            ExternType::Func(ft) => ft,
            _ => {
                return Err(SandboxError::ValidationError(format!(
                    "export '{name}' must be a function"
                )));
            }
        };

        let params: Vec<ValType> = func_ty.params().collect();
        let results: Vec<ValType> = func_ty.results().collect();

        if params.len() != expected_param_count || !params.iter().all(is_i32) {
            return Err(SandboxError::ValidationError(format!(
                "export '{name}' has wrong param signature: expected {expected_param_count} i32 params, got {}",
                params.len()
            )));
        }
        if results.len() != expected_result_count || !results.iter().all(is_i32) {
            return Err(SandboxError::ValidationError(format!(
                "export '{name}' has wrong result signature: expected {expected_result_count} i32 results, got {}",
                results.len()
            )));
        }
    }

    Ok(())
}

fn validate_imports(module: &Module) -> Result<(), SandboxError> {
    for import in module.imports() {
        let module_name = import.module();
        let is_rpc = module_name == RPC_IMPORT_MODULE && import.name() == RPC_IMPORT_FUNC;
        let is_wasi = module_name.starts_with("wasi_");

        if !is_rpc && !is_wasi {
            return Err(SandboxError::ValidationError(format!(
                "import from disallowed module '{module_name}': {}",
                import.name()
            )));
        }

        if is_rpc && !matches!(import.ty(), ExternType::Func(_)) {
            return Err(SandboxError::ValidationError(
                "pybox_json_rpc import must be a function".into(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::Engine;

    fn valid_module_wat() -> &'static str {
        r#"
            (module
                (memory (export "memory") 2)
                (func (export "pybox_init") (result i32) i32.const 0)
                (func (export "pybox_alloc") (param i32) (result i32) i32.const 0)
                (func (export "pybox_free") (param i32 i32))
                (func (export "pybox_init_local") (param i32) (result i32) i32.const 0)
                (func (export "pybox_init_local_from") (param i32 i32) (result i32) i32.const 0)
                (func (export "pybox_protect") (param i32 i32) (result i32) i32.const 0)
                (func (export "pybox_assign") (param i32 i32 i32 i32) (result i32) i32.const 0)
                (func (export "pybox_exec") (param i32 i32 i32) (result i32) i32.const 0)
            )
        "#
    }

    #[test]
    fn accepts_minimal_valid_module() {
        let engine = Engine::default();
        let module = Module::new(&engine, valid_module_wat()).unwrap();
        validate_module(&module).unwrap();
    }

    #[test]
    fn rejects_missing_export() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "pybox_init") (result i32) i32.const 0)
            )
        "#;
        let engine = Engine::default();
        let module = Module::new(&engine, wat).unwrap();
        assert!(validate_module(&module).is_err());
    }

    #[test]
    fn rejects_missing_memory() {
        let engine = Engine::default();
        let wat = valid_module_wat().replace(r#"(memory (export "memory") 2)"#, "");
        let module = Module::new(&engine, &wat).unwrap();
        assert!(validate_module(&module).is_err());
    }

    #[test]
    fn accepts_rpc_and_wasi_imports() {
        let wat = format!(
            r#"
            (module
                (import "pybox_host" "pybox_json_rpc"
                    (func (param i32 i32 i32 i32 i32) (result i32)))
                (import "wasi_snapshot_preview1" "fd_write"
                    (func (param i32 i32 i32 i32) (result i32)))
                {}
            )
            "#,
            valid_module_wat()
                .trim_start_matches("(module")
                .trim_end()
                .trim_end_matches(')')
        );
        let engine = Engine::default();
        let module = Module::new(&engine, &wat).unwrap();
        validate_module(&module).unwrap();
    }

    #[test]
    fn rejects_unknown_import_module() {
        let wat = format!(
            r#"
            (module
                (import "env" "mystery" (func (result i32)))
                {}
            )
            "#,
            valid_module_wat()
                .trim_start_matches("(module")
                .trim_end()
                .trim_end_matches(')')
        );
        let engine = Engine::default();
        let module = Module::new(&engine, &wat).unwrap();
        assert!(validate_module(&module).is_err());
    }
}
