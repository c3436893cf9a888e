//! Error type for the weighting crate.

use thiserror::Error;

/// Errors raised while reconstructing weighting schemes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeightError {
    /// Serialised weight data was malformed, or named an unknown scheme.
    #[error("weight serialisation error: {0}")]
    Serialisation(String),
}

impl WeightError {
    /// Creates a `Serialisation` error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Serialisation(message.into())
    }
}
