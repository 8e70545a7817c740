//! End-to-end scenarios driving a real compiled `pybox-guest` artifact
//! through the sandbox and engine-facade APIs.

mod common;
use common::*;

use pybox_hostapi::HandlerOutcome;
use serde_json::json;

#[test]
fn e1_assign_and_exec() {
    let sandbox = load_sandbox();
    let mut guest = sandbox.instantiate().unwrap();

    guest.init_local("r").unwrap();
    guest
        .assign("r", "test_val", &json!({"value": "hello pybox"}))
        .unwrap();
    let output = guest.exec("r", "print(test_val)").unwrap();
    assert!(output.contains("{'value': 'hello pybox'}"));
}

#[test]
fn e2_inheritance() {
    let sandbox = load_sandbox();
    let mut guest = sandbox.instantiate().unwrap();

    guest.init_local("root").unwrap();
    guest.exec("root", "root_val='I am root'").unwrap();
    guest.init_local_from("child", "root").unwrap();
    guest.exec("child", "child_val='I am child'").unwrap();

    let root_output = guest.exec("root", "print(root_val);print(child_val)").unwrap();
    assert!(!root_output.contains("I am child"));

    let child_output = guest.exec("child", "print(root_val);print(child_val)").unwrap();
    assert!(child_output.contains("I am root"));
    assert!(child_output.contains("I am child"));
}

#[test]
fn e3_protect() {
    let sandbox = load_sandbox();
    let mut guest = sandbox.instantiate().unwrap();

    guest.init_local("p").unwrap();
    guest.protect("p", "protected").unwrap();
    let output = guest.exec("p", "protected=10").unwrap();
    assert!(output.contains("Cannot modify protected"));
}

#[test]
fn e4_snapshot_rollback() {
    let sandbox = load_sandbox();
    let mut guest = sandbox.instantiate().unwrap();
    let mut snapshots = pybox_sandbox::SnapshotEngine::new(16 * 1024);

    guest.init_local("s").unwrap();
    guest.exec("s", "x=100").unwrap();

    snapshots.capture_base(guest.memory_view()).unwrap();
    guest.exec("s", "x=999").unwrap();

    let mem = guest.memory_view_mut();
    snapshots.restore(mem, -1).unwrap();

    let output = guest.exec("s", "print(x)").unwrap();
    assert!(output.contains("100"));
}

#[test]
fn e5_reentrant_tool() {
    let engine = load_engine();
    engine.init_local("r").unwrap();

    let inner = engine.clone();
    let handle = engine.register_handler(pybox_hostapi::HandlerFn(move |args, _kwargs| {
        let name = args.first().and_then(|v| v.as_str()).unwrap_or_default();
        match inner.exec("r", &format!("print('Hello {name}')")) {
            Ok(output) => HandlerOutcome::Result(json!(output)),
            Err(err) => HandlerOutcome::Raised(err.to_string()),
        }
    }));
    engine
        .assign("r", "hello", &json!({"__pybox_stub__": handle}))
        .unwrap();

    let output = engine.exec("r", "print(hello('pybox'))").unwrap();
    assert!(output.contains("Hello pybox"));
}

#[test]
fn e6_host_escape() {
    let engine = load_engine();
    engine.init_local("e").unwrap();

    let handle = engine.register_handler(pybox_hostapi::HandlerFn(|_args, _kwargs| {
        HandlerOutcome::Escape(Box::new("boom".to_string()))
    }));
    engine
        .assign("e", "escape_tool", &json!({"__pybox_stub__": handle}))
        .unwrap();

    let err = engine.exec("e", "escape_tool()").unwrap_err();
    match err {
        pybox_engine::EngineError::HostEscape(payload) => {
            let msg = payload.downcast_ref::<String>().expect("escape payload type");
            assert_eq!(msg, "boom");
        }
        other => panic!("expected HostEscape, got {other:?}"),
    }

    // the engine is usable again after an escape
    let output = engine.exec("e", "print('still alive')").unwrap();
    assert!(output.contains("still alive"));
}
