//! Shared error taxonomy across the customer-service core crates.
//!
//! Mirrors a wire-stable `client_code()` pattern: every variant maps to a
//! short, stable string the HTTP/WS layers can hand back to callers without
//! leaking internals.

use thiserror::Error;

/// Client-facing error codes (stable API, never renamed once shipped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    Validation,
    AuthFailed,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    TransientStorage,
    Ai,
    Translation,
    Internal,
}

impl ClientCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::Validation => "VALIDATION",
            ClientCode::AuthFailed => "AUTH_FAILED",
            ClientCode::Forbidden => "FORBIDDEN",
            ClientCode::NotFound => "NOT_FOUND",
            ClientCode::Conflict => "CONFLICT",
            ClientCode::RateLimited => "RATE_LIMITED",
            ClientCode::TransientStorage => "TRANSIENT_STORAGE",
            ClientCode::Ai => "AI_ERROR",
            ClientCode::Translation => "TRANSLATION_ERROR",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type for the core/domain crates.
pub type Result<T> = std::result::Result<T, CsError>;

/// Unified error type propagated from domain logic up to the transport layer.
#[derive(Debug, Error)]
pub enum CsError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("auth failed")]
    AuthFailed,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited")]
    RateLimited,

    #[error("transient storage error: {0}")]
    TransientStorage(String),

    #[error("ai adapter error: {0}")]
    Ai(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl CsError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            CsError::Validation(_) => ClientCode::Validation,
            CsError::AuthFailed => ClientCode::AuthFailed,
            CsError::Forbidden(_) => ClientCode::Forbidden,
            CsError::NotFound(_) => ClientCode::NotFound,
            CsError::Conflict(_) => ClientCode::Conflict,
            CsError::RateLimited => ClientCode::RateLimited,
            CsError::TransientStorage(_) => ClientCode::TransientStorage,
            CsError::Ai(_) => ClientCode::Ai,
            CsError::Translation(_) => ClientCode::Translation,
            CsError::Internal(_) => ClientCode::Internal,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CsError::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        CsError::Conflict(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        CsError::Validation(what.into())
    }
}
