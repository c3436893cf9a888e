//! Error types for query construction and serialisation.

use thiserror::Error;

/// Errors raised while building, validating or (un)serialising queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// A query was built from invalid arguments.
    #[error("invalid query argument: {0}")]
    InvalidArgument(String),

    /// An operation was applied to a query in the wrong state.
    #[error("invalid query operation: {0}")]
    InvalidOperation(String),

    /// Serialised query data was truncated or malformed.
    #[error("query serialisation error: {0}")]
    Serialisation(String),
}

impl QueryError {
    /// Creates an `InvalidArgument` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates a `Serialisation` error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Serialisation(message.into())
    }
}
