//! Pipeline errors.

use storj_bridge::BridgeError;
use storj_core::CoreError;
use storj_network::NetworkError;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the upload and download pipelines.
///
/// Callers see a single error per high-level call; intermediate retries
/// are absorbed by the orchestrators.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Demux error: {0}")]
    Demux(String),

    #[error("Mux error: {0}")]
    Mux(String),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] NetworkError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("All farmers excluded for shard {0}")]
    FarmersExhausted(usize),

    #[error("Operation aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}
