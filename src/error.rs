//! Error types for registry operations.

use thiserror::Error;

/// The error type for registry operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("record belongs to domain {found}, expected {expected}")]
    ScopeViolation { expected: String, found: String },

    #[error("{kind} already exists: {id}")]
    DuplicateEntry { kind: &'static str, id: String },

    #[error("adding {member} to {group} would close a membership cycle")]
    CyclicMembership { group: String, member: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Store(#[from] heed::Error),
}

impl Error {
    #[inline]
    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        Error::NotFound { kind, id: id.to_string() }
    }

    #[inline]
    pub(crate) fn duplicate(kind: &'static str, id: &str) -> Self {
        Error::DuplicateEntry { kind, id: id.to_string() }
    }

    #[inline]
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only storage-level failures qualify; every other kind reports a fact
    /// about the request or the data that a retry will not change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;
