//! Error taxonomy shared by every Reaper component.
//!
//! Each variant maps 1:1 to an entry in the policy/audit design's error-kind
//! table: VALIDATION, POLICY_DENIED, APPROVAL_REQUIRED, NOT_FOUND, CONFLICT,
//! UNAUTHENTICATED, RATE_LIMITED, INTEGRITY_VIOLATION, SERVER.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReaperError>;

#[derive(Error, Debug)]
pub enum ReaperError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("policy denied the call: {reason}")]
    PolicyDenied { reason: String },

    #[error("call requires approval: {reason}")]
    ApprovalRequired { reason: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("audit chain integrity violation: {message}")]
    IntegrityViolation { message: String },

    #[error("internal server error: {message}")]
    Server { message: String },

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl ReaperError {
    /// Stable machine-readable error kind, used as the JSON `error` field
    /// and for client-side dispatch (raise-on-deny, retry policy, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            ReaperError::Validation { .. } => "VALIDATION",
            ReaperError::PolicyDenied { .. } => "POLICY_DENIED",
            ReaperError::ApprovalRequired { .. } => "APPROVAL_REQUIRED",
            ReaperError::NotFound { .. } => "NOT_FOUND",
            ReaperError::Conflict { .. } => "CONFLICT",
            ReaperError::Unauthenticated => "UNAUTHENTICATED",
            ReaperError::RateLimited { .. } => "RATE_LIMITED",
            ReaperError::IntegrityViolation { .. } => "INTEGRITY_VIOLATION",
            ReaperError::Server { .. } | ReaperError::Serialization { .. } => "SERVER",
        }
    }

    /// HTTP status code for the public API surface.
    pub fn http_status(&self) -> u16 {
        match self {
            ReaperError::Validation { .. } => 400,
            ReaperError::PolicyDenied { .. } | ReaperError::ApprovalRequired { .. } => 200,
            ReaperError::NotFound { .. } => 404,
            ReaperError::Conflict { .. } => 409,
            ReaperError::Unauthenticated => 401,
            ReaperError::RateLimited { .. } => 429,
            ReaperError::IntegrityViolation { .. } => 200,
            ReaperError::Server { .. } | ReaperError::Serialization { .. } => 500,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ReaperError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ReaperError::NotFound { what: what.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ReaperError::Conflict {
            message: message.into(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        ReaperError::Server {
            message: message.into(),
        }
    }
}
