//! Error types for the ADS client.

use thiserror::Error;

/// Error type for the ADS client.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to dial the discovery server.
    #[error("connection error: {0}")]
    Connection(String),

    /// Credential material is unreadable, malformed, or expired.
    #[error("credential error: {0}")]
    Credential(String),

    /// The stream failed at the transport level.
    #[cfg(feature = "transport-tonic")]
    #[error("stream error: {0}")]
    Stream(tonic::Status),

    /// The stream was closed by the peer.
    #[error("stream closed")]
    StreamClosed,

    /// A protobuf payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A configuration value was rejected.
    #[error("validation error: {0}")]
    Validation(String),

    /// A consumer wait elapsed before the awaited updates arrived.
    #[error("timeout, still waiting for updates: {0:?}")]
    Timeout(Vec<String>),

    /// The client was closed, or the session ended while waiting.
    #[error("closed")]
    Closed,

    /// Local file access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A cache snapshot could not be serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for ADS client operations.
pub type Result<T> = std::result::Result<T, Error>;
