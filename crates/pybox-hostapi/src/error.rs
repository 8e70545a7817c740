//! Host-side error type for the sandbox crate and engine facade.
//!
//! `HostError` wraps [`ErrorCode`] for the handful of errors that cross the
//! guest boundary as a raw status code, and carries an `Internal` variant
//! for host-only failures that are never the guest's concern.

use pybox_primitives::ErrorCode;

#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("host error: {0}")]
    Code(ErrorCode),
    #[error("internal host error: {0}")]
    Internal(String),
}

impl HostError {
    pub fn to_error_code(&self) -> i32 {
        match self {
            Self::Code(code) => code.as_i32(),
            Self::Internal(_) => ErrorCode::Internal as i32,
        }
    }

    pub fn unknown_context() -> Self {
        Self::Code(ErrorCode::Unknown)
    }

    pub fn already_exists() -> Self {
        Self::Code(ErrorCode::AlreadyExists)
    }

    pub fn cycle() -> Self {
        Self::Code(ErrorCode::Cycle)
    }

    pub fn out_of_range() -> Self {
        Self::Code(ErrorCode::OutOfRange)
    }

    pub fn not_ready() -> Self {
        Self::Code(ErrorCode::NotReady)
    }

    pub fn bad_pointer() -> Self {
        Self::Code(ErrorCode::BadPointer)
    }

    pub fn invalid_encoding() -> Self {
        Self::Code(ErrorCode::InvalidEncoding)
    }
}

impl From<ErrorCode> for HostError {
    fn from(code: ErrorCode) -> Self {
        Self::Code(code)
    }
}
