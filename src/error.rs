//! Core error taxonomy (spec'd in the "Error handling design" section).
//!
//! Tool handlers never let these escape as transport-level failures; each is
//! mapped to a `{ error: { code, message, recoverable } }` content payload by
//! `server.rs`. Only genuine programmer errors (panics) are allowed to
//! propagate past the tool boundary.

use serde::Serialize;
use thiserror::Error;

/// The seven error kinds surfaced by the core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("resource exceeded: {0}")]
    ResourceExceeded(String),

    #[error("io: {0}")]
    Io(String),

    #[error("external failure: {0}")]
    ExternalFailure(String),
}

impl Error {
    /// Stable machine-readable code for the wire payload.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::Invalid(_) => "INVALID",
            Error::Timeout(_) => "TIMEOUT",
            Error::ResourceExceeded(_) => "RESOURCE_EXCEEDED",
            Error::Io(_) => "IO",
            Error::ExternalFailure(_) => "EXTERNAL_FAILURE",
        }
    }

    /// Whether a caller can reasonably retry the operation as-is.
    #[must_use]
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ResourceExceeded(_) | Error::Io(_)
        )
    }

    #[must_use]
    pub fn to_wire(&self) -> WireError {
        WireError {
            code: self.code(),
            message: self.to_string(),
            recoverable: self.recoverable(),
        }
    }
}

/// The `{code, message, recoverable}` shape returned inside tool results.
#[derive(Debug, Clone, Serialize)]
pub struct WireError {
    pub code: &'static str,
    pub message: String,
    pub recoverable: bool,
}

pub type Result<T> = std::result::Result<T, Error>;
