//! Transport abstraction for the ADS session.

use crate::client::config::ServerConfig;
use crate::error::Result;
use bytes::Bytes;
use std::future::Future;

#[cfg(feature = "transport-tonic")]
pub mod tonic;

/// Dials the discovery server.
///
/// Called on every connect attempt, so credentials are re-resolved and a
/// fresh connection is made after each failure.
pub trait TransportBuilder: Send + Sync + 'static {
    /// The transport type produced by this builder.
    type Transport: Transport;

    /// Connect to `server`.
    fn build(&self, server: &ServerConfig) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// An established connection that can open ADS streams.
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport.
    type Stream: TransportStream;

    /// Opens a bidirectional ADS stream.
    ///
    /// `initial_requests` are queued ahead of anything sent later, so
    /// servers that hold response headers until the first message still
    /// answer.
    fn new_stream(
        &self,
        initial_requests: Vec<Bytes>,
    ) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// A bidirectional byte stream for one ADS session.
///
/// Bytes are serialized `DiscoveryRequest`/`DiscoveryResponse` messages;
/// (de)serialization is handled by the worker through its codec.
pub trait TransportStream: Send + 'static {
    /// Send serialized request bytes to the server.
    fn send(&mut self, request: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Receive serialized response bytes from the server.
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` - Received a response.
    /// - `Ok(None)` - Stream closed normally.
    /// - `Err(_)` - Stream error (connection dropped, etc.)
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>>> + Send;
}
