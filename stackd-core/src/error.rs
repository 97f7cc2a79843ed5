//! Error types for stackd.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error
//! chains. The reconciler distinguishes a small taxonomy: absent lookups,
//! optimistic-concurrency failures, malformed specs, transient backend
//! faults, and fatal startup failures.

use thiserror::Error;

/// Result type alias for stackd operations.
pub type Result<T> = std::result::Result<T, StackdError>;

/// Main error type for stackd.
#[derive(Error, Debug)]
pub enum StackdError {
    /// A lookup returned absent. Treated as success on delete and as
    /// "already removed, continue" on get.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Optimistic-concurrency failure on a version-guarded update.
    #[error("version mismatch for {id}: expected {expected}, stored {stored}")]
    VersionMismatch { id: String, expected: u64, stored: u64 },

    /// Malformed object, e.g. a spec with a missing or colliding name.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Network or I/O fault talking to the downstream orchestrator.
    #[error("transient backend failure: {reason}")]
    Transient { reason: String },

    /// Event subscription failed at startup. Fatal for the manager.
    #[error("event subscription failed: {reason}")]
    Subscribe { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StackdError {
    /// Build a `NotFound` error for one resource kind.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument { reason: reason.into() }
    }

    /// True when the error is an absent-lookup error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when the error is an optimistic-concurrency failure.
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, Self::VersionMismatch { .. })
    }
}
