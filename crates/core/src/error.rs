//! Errors raised by aggregates and value types.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// A deterministic rejection from the domain model.
///
/// Retrying the same input yields the same error. Storage and broker failures
/// are modelled by the infra crate, not here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input rejected before any state was touched (negative stock, blank ids).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A state change would leave the aggregate inconsistent.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The caller's version does not match the aggregate's.
    #[error("version conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
