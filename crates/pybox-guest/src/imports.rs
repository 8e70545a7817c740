//! The single host import: `pybox_host::pybox_json_rpc`.
//!
//! Every call from guest Python back into the host — whatever handler it
//! names — goes through this one function, keyed by handle rather than by
//! a per-operation import. See [`crate::rpc`] for the marshaling on top of
//! it.

#[link(wasm_import_module = "pybox_host")]
extern "C" {
    /// Dispatch one call to the handler registered under `handle`.
    ///
    /// `request_ptr`/`request_len` point at a JSON-encoded
    /// `{"args": [...], "kwargs": {...}}` body already written into guest
    /// memory. On return, `*response_ptr_out`/`*response_len_out` (written
    /// by the host directly into guest memory) locate a JSON response body
    /// the guest must free with [`crate::exports::pybox_free`] once it is
    /// done reading it.
    ///
    /// Returns one of the dispatch-bridge status codes: `0` success (a
    /// `{"result": ...}` body), `1` unknown handle, `2` the handler raised
    /// (a `{"exception": "..."}` body), `3` the handler requested the
    /// escape path (no response body is written).
    pub fn pybox_json_rpc(
        handle: i32,
        request_ptr: i32,
        request_len: i32,
        response_ptr_out: i32,
        response_len_out: i32,
    ) -> i32;
}
