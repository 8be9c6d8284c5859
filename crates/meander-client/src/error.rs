//! Error types for meander-client.

use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The snapshot endpoint answered with an unexpected status.
    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Invalid server URL '{0}'")]
    InvalidUrl(String),

    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
}
