//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The daemon program name is empty
    #[error("Daemon program must not be empty")]
    EmptyProgram,

    /// A daemon argument cannot be passed to a process
    #[error("Invalid daemon argument at position {index}: {reason}")]
    InvalidArgument { index: usize, reason: String },

    /// Unknown operating mode name
    #[error("Unknown operating mode: {0} (expected authority or peer)")]
    UnknownMode(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
