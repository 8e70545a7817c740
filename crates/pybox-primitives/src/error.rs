//! Error codes for the dispatch bridge and the engine facade.
//!
//! `ErrorCode` is the small, `repr(i32)` vocabulary that crosses the guest
//! boundary as a raw status code. The richer host-internal error types
//! built on top of it (`SandboxError`, `HostError`) live in the crates that
//! actually raise them, each `thiserror`-derived and each converting into
//! `ErrorCode` for the wire.

use std::fmt;

/// Status codes returned by the single guest import, and by the context
/// namespace operations exposed through the engine facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    /// A context id was referenced that does not exist.
    Unknown = 1,
    /// A context id was registered twice.
    AlreadyExists = 2,
    /// `init_local_from` would create a parent cycle.
    Cycle = 3,
    /// An index or handle fell outside its valid range (e.g. a checkpoint
    /// index past the stack, or an unregistered handler handle).
    OutOfRange = 4,
    /// The snapshot engine or guest instance was used before being
    /// initialized.
    NotReady = 5,
    /// The guest trapped (panicked, ran out of fuel, hit a memory fault).
    GuestTrap = 6,
    /// A registered handler raised an exception; carried separately from
    /// this code in the JSON response body.
    HandlerError = 7,
    /// A registered handler requested the escape path; the guest unwinds
    /// and the engine re-raises on the host thread. Never encoded as a
    /// JSON response, only as this bridge-internal status.
    HostEscape = 8,
    /// A pointer or length pair from the guest failed a bounds check.
    BadPointer = 9,
    /// A payload failed to parse as JSON.
    InvalidEncoding = 10,
    Internal = 11,
}

impl ErrorCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::Unknown),
            2 => Some(Self::AlreadyExists),
            3 => Some(Self::Cycle),
            4 => Some(Self::OutOfRange),
            5 => Some(Self::NotReady),
            6 => Some(Self::GuestTrap),
            7 => Some(Self::HandlerError),
            8 => Some(Self::HostEscape),
            9 => Some(Self::BadPointer),
            10 => Some(Self::InvalidEncoding),
            11 => Some(Self::Internal),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Unknown => "ERR_UNKNOWN_CONTEXT",
            Self::AlreadyExists => "ERR_ALREADY_EXISTS",
            Self::Cycle => "ERR_CYCLE",
            Self::OutOfRange => "ERR_OUT_OF_RANGE",
            Self::NotReady => "ERR_NOT_READY",
            Self::GuestTrap => "ERR_GUEST_TRAP",
            Self::HandlerError => "ERR_HANDLER_ERROR",
            Self::HostEscape => "ERR_HOST_ESCAPE",
            Self::BadPointer => "ERR_BAD_POINTER",
            Self::InvalidEncoding => "ERR_INVALID_ENCODING",
            Self::Internal => "ERR_INTERNAL",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_repr_values() {
        assert_eq!(ErrorCode::Ok as i32, 0);
        assert_eq!(ErrorCode::HostEscape as i32, 8);
        assert_eq!(ErrorCode::Internal as i32, 11);
    }

    #[test]
    fn error_code_roundtrip() {
        for code in 0..=11 {
            let ec = ErrorCode::from_i32(code).unwrap();
            assert_eq!(ec.as_i32(), code);
        }
    }

    #[test]
    fn error_code_rejects_unknown() {
        assert_eq!(ErrorCode::from_i32(255), None);
    }
}
