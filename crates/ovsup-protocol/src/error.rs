//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding management output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A snapshot table header lacks a column we key on
    #[error("{table} table is missing the {column:?} column")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },
}
