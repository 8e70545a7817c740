//! Shared test helpers for integration tests.
//!
//! Loads the real compiled `pybox-guest` wasm32-wasip1 artifact and wires
//! it up against both the low-level sandbox API and the engine facade.

#![allow(dead_code)]

use pybox_engine::Engine;
use pybox_hostapi::EngineConfig;
use pybox_sandbox::Sandbox;

/// WASM artifact path (relative to this crate's manifest dir).
const WASM_ARTIFACT: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../target/wasm32-wasip1/release/pybox_guest.wasm"
);

/// Load the real wasm artifact into a `Sandbox` with default config.
pub fn load_sandbox() -> Sandbox {
    let path = std::path::Path::new(WASM_ARTIFACT);
    assert!(
        path.exists(),
        "wasm artifact not found at {:?}. Build with: cargo build --release -p pybox-guest --target wasm32-wasip1",
        path
    );
    Sandbox::from_file(path, EngineConfig::default()).expect("failed to load sandbox")
}

/// Load the real wasm artifact into a `Sandbox` with a custom config.
pub fn load_sandbox_with_config(config: EngineConfig) -> Sandbox {
    let path = std::path::Path::new(WASM_ARTIFACT);
    assert!(path.exists(), "wasm artifact not found at {:?}", path);
    Sandbox::from_file(path, config).expect("failed to load sandbox with config")
}

/// Load the real wasm artifact into an `Engine`, for scenarios that need
/// the reentrant facade rather than a raw `GuestInstance`.
pub fn load_engine() -> Engine {
    let path = std::path::Path::new(WASM_ARTIFACT);
    assert!(
        path.exists(),
        "wasm artifact not found at {:?}. Build with: cargo build --release -p pybox-guest --target wasm32-wasip1",
        path
    );
    let bytes = std::fs::read(path).expect("failed to read wasm artifact");
    Engine::new(&bytes, EngineConfig::default()).expect("failed to construct engine")
}
