// src/error.rs
use thiserror::Error;

/// Failures of the UserOperation codec. None of these are transient: they
/// always point at a malformed input or key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Overflow error: {0}")]
    Overflow(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

#[derive(Error, Debug)]
pub enum PaymasterError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Nonce source error: {0}")]
    NonceSource(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

impl PaymasterError {
    /// True when the error was caused by the request payload itself.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            PaymasterError::Codec(CodecError::Encoding(_) | CodecError::Overflow(_))
        )
    }
}
