//! Crate-owned discovery message types.
//!
//! These types are codec-agnostic and serve as the interface between
//! the synchronization logic and the codec layer. The codec converts these
//! to/from the wire format.

use std::collections::BTreeMap;

use bytes::Bytes;

/// A discovery request to send to the discovery server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryRequest {
    /// The version_info of the most recent response applied for this type,
    /// or empty for the first request.
    pub version_info: String,
    /// The node making the request. Present only on the first request of a session.
    pub node: Option<Node>,
    /// Explicit resource names for narrowed watches. Empty means "all".
    pub resource_names: Vec<String>,
    /// Type URL of the resource being requested.
    pub type_url: String,
    /// The nonce of the response being acknowledged, or empty for the first request.
    pub response_nonce: String,
    /// Error details if this is a NACK (negative acknowledgment).
    pub error_detail: Option<ErrorDetail>,
}

impl DiscoveryRequest {
    /// Create a request for the given type with empty version and nonce.
    pub fn new(type_url: impl Into<String>) -> Self {
        Self {
            type_url: type_url.into(),
            ..Default::default()
        }
    }

    /// Set the explicit resource names.
    pub fn with_resource_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if this request carries an error detail.
    pub fn is_nack(&self) -> bool {
        self.error_detail.is_some()
    }
}

/// A discovery response from the discovery server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryResponse {
    /// The version of the response data. Opaque, compared only for equality.
    pub version_info: String,
    /// The response resources wrapped as Any protos.
    pub resources: Vec<ResourceAny>,
    /// Type URL of the resources.
    pub type_url: String,
    /// Nonce for this response, to be echoed back in the next request.
    pub nonce: String,
}

/// A resource wrapped as google.protobuf.Any.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAny {
    /// Type URL of the resource.
    pub type_url: String,
    /// Serialized resource bytes.
    pub value: Bytes,
}

/// Node identification sent once per session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    /// The opaque identity string.
    pub id: String,
    /// The cluster the node belongs to.
    pub cluster: Option<String>,
    /// Locality specifying where the node is running.
    pub locality: Option<Locality>,
    /// String metadata attached to the node.
    pub metadata: BTreeMap<String, String>,
    /// Free-form string identifying the client type.
    pub user_agent_name: String,
    /// Version of the client.
    pub user_agent_version: String,
}

impl Node {
    /// Create a new Node with the given identity string.
    ///
    /// Other fields can be set using builder methods.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_agent_name: env!("CARGO_PKG_NAME").to_string(),
            user_agent_version: env!("CARGO_PKG_VERSION").to_string(),
            ..Default::default()
        }
    }

    /// Set the cluster.
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Set the locality.
    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = Some(locality);
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Locality information identifying where a node is running.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Locality {
    /// Region the node is in.
    pub region: String,
    /// Zone within the region.
    pub zone: String,
    /// Sub-zone within the zone.
    pub sub_zone: String,
}

/// Error details for NACK requests.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorDetail {
    /// gRPC status code.
    pub code: i32,
    /// Error message.
    pub message: String,
}
