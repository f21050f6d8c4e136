//! `envoy.config.cluster.v3` messages.

use serde::Serialize;

/// `envoy.config.cluster.v3.Cluster`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Cluster {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(oneof = "cluster::ClusterDiscoveryType", tags = "2, 38")]
    pub cluster_discovery_type: Option<cluster::ClusterDiscoveryType>,
    #[prost(message, optional, tag = "3")]
    pub eds_cluster_config: Option<cluster::EdsClusterConfig>,
}

/// Nested types for [`Cluster`].
pub mod cluster {
    use serde::Serialize;

    /// `envoy.config.cluster.v3.Cluster.DiscoveryType`, as its wire value.
    pub mod discovery_type {
        pub const STATIC: i32 = 0;
        pub const STRICT_DNS: i32 = 1;
        pub const LOGICAL_DNS: i32 = 2;
        pub const EDS: i32 = 3;
        pub const ORIGINAL_DST: i32 = 4;
    }

    /// `envoy.config.cluster.v3.Cluster.cluster_discovery_type`.
    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize)]
    pub enum ClusterDiscoveryType {
        #[prost(int32, tag = "2")]
        Type(i32),
        #[prost(message, tag = "38")]
        ClusterType(CustomClusterType),
    }

    /// `envoy.config.cluster.v3.Cluster.CustomClusterType`.
    #[derive(Clone, PartialEq, ::prost::Message, Serialize)]
    pub struct CustomClusterType {
        #[prost(string, tag = "1")]
        pub name: String,
    }

    /// `envoy.config.cluster.v3.Cluster.EdsClusterConfig`.
    #[derive(Clone, PartialEq, Eq, ::prost::Message, Serialize)]
    pub struct EdsClusterConfig {
        #[prost(string, tag = "2")]
        pub service_name: String,
    }
}
