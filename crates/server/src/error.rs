//! Operation-level error type.
//!
//! Everything an operation (or the machinery running it) can fail with is
//! resolved into an [`OperationError`], which maps 1:1 onto a response
//! envelope. Nothing propagates across the router boundary as a panic.

use hostbridge_protocol::ErrorCode;
use thiserror::Error;

/// A failure produced by an operation or by the coordination layer on its
/// behalf. The code passes through to the client verbatim.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct OperationError {
    pub code: ErrorCode,
    pub message: String,
}

impl OperationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPayload, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Operation-specific code, surfaced to the client unchanged.
    pub fn op(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Op(code.into()), message)
    }
}
