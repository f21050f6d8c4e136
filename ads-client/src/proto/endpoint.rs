//! `envoy.config.endpoint.v3` messages.

use serde::Serialize;

use super::UInt32Value;
use super::discovery::Locality;
use super::listener::Address;

/// `envoy.config.endpoint.v3.ClusterLoadAssignment`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct ClusterLoadAssignment {
    #[prost(string, tag = "1")]
    pub cluster_name: String,
    #[prost(message, repeated, tag = "2")]
    pub endpoints: Vec<LocalityLbEndpoints>,
}

/// `envoy.config.endpoint.v3.LocalityLbEndpoints`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct LocalityLbEndpoints {
    #[prost(message, optional, tag = "1")]
    pub locality: Option<Locality>,
    #[prost(message, repeated, tag = "2")]
    pub lb_endpoints: Vec<LbEndpoint>,
    #[prost(message, optional, tag = "3")]
    pub load_balancing_weight: Option<UInt32Value>,
    #[prost(uint32, tag = "5")]
    pub priority: u32,
}

/// `envoy.config.endpoint.v3.LbEndpoint`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct LbEndpoint {
    #[prost(oneof = "lb_endpoint::HostIdentifier", tags = "1")]
    pub host_identifier: Option<lb_endpoint::HostIdentifier>,
    #[prost(int32, tag = "2")]
    pub health_status: i32,
    #[prost(message, optional, tag = "4")]
    pub load_balancing_weight: Option<UInt32Value>,
}

/// Nested types for [`LbEndpoint`].
pub mod lb_endpoint {
    use serde::Serialize;

    /// `envoy.config.endpoint.v3.LbEndpoint.host_identifier`.
    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize)]
    pub enum HostIdentifier {
        #[prost(message, tag = "1")]
        Endpoint(super::Endpoint),
    }
}

/// `envoy.config.endpoint.v3.Endpoint`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Endpoint {
    #[prost(message, optional, tag = "1")]
    pub address: Option<Address>,
    #[prost(string, tag = "3")]
    pub hostname: String,
}
