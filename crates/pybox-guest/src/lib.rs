//! `pybox-guest` — the `wasm32-wasip1` cdylib embedding the Python
//! evaluator.
//!
//! This crate builds the guest half of the sandbox: a persistent
//! `rustpython-vm` interpreter, the per-context namespace manager, and the
//! dispatch-bridge client that calls back into the host through the single
//! `pybox_host::pybox_json_rpc` import. It is linked against `std`, not
//! `no_std` — `rustpython-vm` and WASI filesystem access both require it.
//!
//! Module layout:
//! - [`imports`] — the one host import
//! - [`convert`] — JSON <-> Python object conversion
//! - [`output`] — captured stdout/stderr for one `exec` call
//! - [`context`] — per-context namespace manager (copy-on-write parent
//!   inheritance, protected-name guard)
//! - [`rpc`] — the dispatch-bridge client, including the handler stub
//!   rustpython callable `assign` installs
//! - [`evaluator`] — ties the above together for one `pybox_exec` call
//! - [`exports`] — the guest ABI, `#[no_mangle] extern "C"` functions

mod context;
mod convert;
mod evaluator;
mod exports;
mod imports;
mod output;
mod rpc;

pub use exports::{
    pybox_alloc, pybox_assign, pybox_exec, pybox_free, pybox_init, pybox_init_local,
    pybox_init_local_from, pybox_protect,
};
