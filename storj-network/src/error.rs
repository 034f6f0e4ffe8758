//! Network-layer errors.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors raised by the peer protocol, tunnel discovery, and data channels
#[derive(Error, Debug)]
pub enum NetworkError {
    // ===== Protocol Errors (not retried; the message is dropped) =====
    #[error("Protocol version is incompatible")]
    IncompatibleVersion,

    #[error("Message signature expired")]
    SignatureExpired,

    #[error("Signature verification failed")]
    SignatureFailed,

    #[error("Message is missing required parameters: {0}")]
    MissingParams(String),

    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),

    // ===== Tunnel Discovery Errors =====
    #[error("Could not find a neighbor to query for tunnels")]
    NoTunnelNeighbor,

    #[error("Could not find a neighbor to query for probe")]
    NoProbeNeighbor,

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("Tunnel establishment failed: {0}")]
    TunnelFailed(String),

    // ===== Data Channel Errors =====
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Handshake rejected: {0}")]
    Handshake(String),

    #[error("Channel idle for {0:?}")]
    IdleTimeout(Duration),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Invalid contact: {0}")]
    InvalidContact(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        NetworkError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_messages() {
        // Wire-visible messages peers match on
        assert_eq!(
            NetworkError::IncompatibleVersion.to_string(),
            "Protocol version is incompatible"
        );
        assert_eq!(
            NetworkError::SignatureExpired.to_string(),
            "Message signature expired"
        );
        assert_eq!(
            NetworkError::SignatureFailed.to_string(),
            "Signature verification failed"
        );
        assert_eq!(
            NetworkError::NoTunnelNeighbor.to_string(),
            "Could not find a neighbor to query for tunnels"
        );
        assert_eq!(
            NetworkError::NoProbeNeighbor.to_string(),
            "Could not find a neighbor to query for probe"
        );
    }
}
