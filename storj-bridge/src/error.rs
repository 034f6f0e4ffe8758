//! Bridge client errors.

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Normalized bridge request outcomes
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Transport-level failure reaching the bridge
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP >= 400 with the bridge's error message
    #[error("Bridge error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid bridge URL: {0}")]
    InvalidUrl(String),

    #[error("Unexpected response body: {0}")]
    Deserialize(String),
}

impl BridgeError {
    /// Whether the call site may retry: transport failures and gateway
    /// errors only. Other API errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Network(_) => true,
            BridgeError::Api { status, .. } => matches!(status, 502 | 503 | 504),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BridgeError::Network("timed out".into()).is_transient());
        assert!(BridgeError::Api { status: 503, message: "unavailable".into() }.is_transient());
        assert!(!BridgeError::Api { status: 404, message: "missing".into() }.is_transient());
        assert!(!BridgeError::Api { status: 400, message: "bad".into() }.is_transient());
        assert!(!BridgeError::InvalidUrl("x".into()).is_transient());
    }
}
