//! Codec for encoding/decoding discovery messages.
//!
//! The codec layer converts between crate-owned message types
//! ([`DiscoveryRequest`], [`DiscoveryResponse`]) and serialized bytes,
//! so the synchronization logic never touches the wire format directly.

use crate::error::Result;
use crate::message::{DiscoveryRequest, DiscoveryResponse};
use bytes::Bytes;

pub mod prost;

/// Trait for encoding/decoding discovery messages.
///
/// Implementations convert between the crate-owned message types
/// and their serialized wire format.
pub trait XdsCodec: Send + Sync + 'static {
    /// Encode a [`DiscoveryRequest`] to bytes.
    fn encode_request(&self, request: &DiscoveryRequest) -> Result<Bytes>;

    /// Decode bytes into a [`DiscoveryResponse`].
    fn decode_response(&self, bytes: Bytes) -> Result<DiscoveryResponse>;
}
