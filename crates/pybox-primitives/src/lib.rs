//! `pybox-primitives` — foundational types shared by the sandbox host and guest.
//!
//! This crate provides the error codes, the JSON wire format for the dispatch
//! bridge, and the block-hashing routine used by the snapshot engine. It has
//! no knowledge of `wasmtime` or of the embedded Python evaluator; it is pure
//! data plus pure functions so both host and guest crates can depend on it.

pub mod codec;
pub mod error;
pub mod hash;
pub mod types;

pub use error::ErrorCode;
pub use hash::{hash_block, BlockDigest};
pub use types::{ContextId, HandlerId, API_VERSION};
