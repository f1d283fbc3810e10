//! Errors raised while checking job payloads against POS invariants.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// A payload that will never succeed no matter how often it is retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Not a UUID; the message is prefixed with the identifier type.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
