//! Small shared type aliases and constants.

/// Name identifying an execution context. Contexts are created by name, not
/// by a host-assigned handle, so this is a plain owned string rather than a
/// numeric id.
pub type ContextId = String;

/// Dense, monotonically assigned handle identifying a registered handler.
pub type HandlerId = u32;

/// Wire format version for the `pybox_json_rpc` payloads. Bumped if the
/// request/response envelope shape ever changes incompatibly.
pub const API_VERSION: u32 = 1;
