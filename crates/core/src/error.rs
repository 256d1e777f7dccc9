//! Errors raised by the pure primitives (ids, codes, scopes).

use thiserror::Error;

/// Parsing/validation failure of a primitive value.
///
/// Authentication, storage and network failures are modelled by the crates
/// that own them (`AuthError`, `StoreError`, `AllowlistError`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// e.g. an unknown data-scope name read from the role table.
    #[error("invalid value: {0}")]
    Validation(String),

    /// Identifier text that is not a UUID; the message names the id type.
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
