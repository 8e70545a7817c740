//! JSON <-> Python object conversion for values crossing the dispatch
//! bridge and the `pybox_assign` ABI call.
//!
//! Only JSON-representable shapes cross the boundary: `None`/bool/int/
//! float/str/list/dict. Anything else a handler call argument or return
//! value turns out to be raises a `TypeError` rather than silently
//! dropping data.

use rustpython_vm::builtins::{PyDictRef, PyList, PyStr, PyTuple};
use rustpython_vm::{AsObject, PyObjectRef, PyResult, VirtualMachine};
use serde_json::Value;

pub fn json_to_py(vm: &VirtualMachine, value: &Value) -> PyObjectRef {
    match value {
        Value::Null => vm.ctx.none(),
        Value::Bool(b) => vm.ctx.new_bool(*b).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                vm.ctx.new_int(i).into()
            } else if let Some(f) = n.as_f64() {
                vm.ctx.new_float(f).into()
            } else {
                vm.ctx.none()
            }
        }
        Value::String(s) => vm.ctx.new_str(s.as_str()).into(),
        Value::Array(items) => {
            let values: Vec<PyObjectRef> = items.iter().map(|v| json_to_py(vm, v)).collect();
            vm.ctx.new_list(values).into()
        }
        Value::Object(map) => {
            let dict = vm.ctx.new_dict();
            for (key, v) in map {
                let _ = dict.set_item(key.as_str(), json_to_py(vm, v), vm);
            }
            dict.into()
        }
    }
}

pub fn py_to_json(vm: &VirtualMachine, obj: &PyObjectRef) -> PyResult<Value> {
    if vm.is_none(obj) {
        return Ok(Value::Null);
    }
    if obj.fast_isinstance(vm.ctx.types.bool_type) {
        let b: bool = obj.clone().try_into_value(vm)?;
        return Ok(Value::Bool(b));
    }
    if obj.fast_isinstance(vm.ctx.types.int_type) {
        let i: i64 = obj.clone().try_into_value(vm)?;
        return Ok(Value::from(i));
    }
    if obj.fast_isinstance(vm.ctx.types.float_type) {
        let f: f64 = obj.clone().try_into_value(vm)?;
        return Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }
    if let Some(s) = obj.downcast_ref::<PyStr>() {
        return Ok(Value::String(s.as_str().to_owned()));
    }
    if let Some(list) = obj.downcast_ref::<PyList>() {
        let items = list
            .borrow_vec()
            .iter()
            .map(|v| py_to_json(vm, v))
            .collect::<PyResult<Vec<_>>>()?;
        return Ok(Value::Array(items));
    }
    if let Some(tuple) = obj.downcast_ref::<PyTuple>() {
        let items = tuple
            .as_slice()
            .iter()
            .map(|v| py_to_json(vm, v))
            .collect::<PyResult<Vec<_>>>()?;
        return Ok(Value::Array(items));
    }
    if let Ok(dict) = PyDictRef::try_from_object(vm, obj.clone()) {
        let mut map = serde_json::Map::new();
        for (key, v) in &dict {
            let key = key.downcast_ref::<PyStr>().ok_or_else(|| {
                vm.new_type_error("dict keys passed to the host must be str".to_owned())
            })?;
            map.insert(key.as_str().to_owned(), py_to_json(vm, &v)?);
        }
        return Ok(Value::Object(map));
    }
    Err(vm.new_type_error(format!(
        "value of type {} is not JSON-serializable",
        obj.class().name()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpython_vm::Interpreter;
    use serde_json::json;

    #[test]
    fn scalars_roundtrip() {
        let interp = Interpreter::without_stdlib(Default::default());
        interp.enter(|vm| {
            for value in [json!(null), json!(true), json!(7), json!("hi")] {
                let obj = json_to_py(vm, &value);
                assert_eq!(py_to_json(vm, &obj).unwrap(), value);
            }
        });
    }

    #[test]
    fn list_and_dict_roundtrip() {
        let interp = Interpreter::without_stdlib(Default::default());
        interp.enter(|vm| {
            let value = json!({"a": [1, 2, "three"], "b": null});
            let obj = json_to_py(vm, &value);
            assert_eq!(py_to_json(vm, &obj).unwrap(), value);
        });
    }

    #[test]
    fn unsupported_type_raises_type_error() {
        let interp = Interpreter::without_stdlib(Default::default());
        interp.enter(|vm| {
            let obj: PyObjectRef = vm
                .new_function("noop", |_args: rustpython_vm::function::FuncArgs, vm: &VirtualMachine| vm.ctx.none())
                .into();
            assert!(py_to_json(vm, &obj).is_err());
        });
    }
}
