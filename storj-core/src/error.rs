//! Error types for the core crate.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Unified error type for key material, hashing, and shard handling
#[derive(Error, Debug)]
pub enum CoreError {
    // ===== Key Material Errors =====
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid WIF encoding: {0}")]
    InvalidWif(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    // ===== Hashing Errors =====
    #[error("Invalid hash length: expected {expected}, got {actual}")]
    InvalidHashLength { expected: usize, actual: usize },

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    // ===== Shard Errors =====
    #[error("Shard index out of range: {index} (max: {max})")]
    ShardIndexOutOfRange { index: usize, max: usize },

    #[error("Audit tree has no leaves")]
    EmptyAuditTree,

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hex::FromHexError> for CoreError {
    fn from(err: hex::FromHexError) -> Self {
        CoreError::InvalidHex(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidHashLength {
            expected: 20,
            actual: 32,
        };
        assert_eq!(
            err.to_string(),
            "Invalid hash length: expected 20, got 32"
        );
    }
}
