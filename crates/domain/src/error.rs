//! Shared error type used across all quoroom crates.
//!
//! Each variant corresponds to one user-visible error kind. Callers that
//! need to branch on the category (HTTP mapping, tool-result envelopes)
//! use [`Error::kind`] rather than matching variants directly.

use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A reference crossed a room boundary.
    #[error("out of scope: {0}")]
    Scope(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("executor failed: {0}")]
    ExecutorFailed(String),

    #[error("chain failed: {0}")]
    ChainFailed(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stable machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidInput,
    InvalidState,
    Scope,
    RateLimited,
    Timeout,
    ExecutorFailed,
    ChainFailed,
    Conflict,
    Unauthorized,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Scope(_) => ErrorKind::Scope,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ExecutorFailed(_) => ErrorKind::ExecutorFailed,
            Self::ChainFailed(_) => ErrorKind::ChainFailed,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Short helper for the most common construction.
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn invalid_input(msg: impl std::fmt::Display) -> Self {
        Self::InvalidInput(msg.to_string())
    }

    pub fn invalid_state(msg: impl std::fmt::Display) -> Self {
        Self::InvalidState(msg.to_string())
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(format!("io: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Error::not_found("room 3").kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::RateLimited { retry_after_secs: 30 }.kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(Error::ChainFailed("rpc".into()).kind(), ErrorKind::ChainFailed);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidState).unwrap();
        assert_eq!(json, "\"invalid_state\"");
        let json = serde_json::to_string(&ErrorKind::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
    }

    #[test]
    fn display_is_single_line() {
        let e = Error::InvalidInput("cron expression \"x\" is malformed".into());
        assert!(!e.to_string().contains('\n'));
    }

    #[test]
    fn io_error_maps_to_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let e: Error = io.into();
        assert_eq!(e.kind(), ErrorKind::Internal);
    }
}
