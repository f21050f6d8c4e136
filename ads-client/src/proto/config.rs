//! Envelope for generic versioned config objects (`istio.mcp.v1alpha1`).

use std::collections::HashMap;

/// `istio.mcp.v1alpha1.Resource`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Resource {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<Metadata>,
    #[prost(message, optional, tag = "2")]
    pub body: Option<prost_types::Any>,
}

/// `istio.mcp.v1alpha1.Metadata`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metadata {
    /// Fully qualified `namespace/name`.
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub create_time: Option<prost_types::Timestamp>,
    #[prost(string, tag = "3")]
    pub version: String,
    #[prost(map = "string, string", tag = "4")]
    pub labels: HashMap<String, String>,
    #[prost(map = "string, string", tag = "5")]
    pub annotations: HashMap<String, String>,
}
