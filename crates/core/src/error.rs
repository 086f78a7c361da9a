//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, illegal lifecycle moves). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A credit-status transition that the lifecycle does not allow.
    #[error("invalid credit status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::CreditStatus,
        to: crate::CreditStatus,
    },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A partner code that is not one of the known networks.
    #[error("unknown partner: {0}")]
    UnknownPartner(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unknown_partner(code: impl Into<String>) -> Self {
        Self::UnknownPartner(code.into())
    }
}
