//! `envoy.config.listener.v3` messages and the network filters the
//! classifier looks into.

use serde::Serialize;

use super::Any;

/// `envoy.config.listener.v3.Listener`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Listener {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub address: Option<Address>,
    #[prost(message, repeated, tag = "3")]
    pub filter_chains: Vec<FilterChain>,
    #[prost(message, optional, tag = "19")]
    pub api_listener: Option<ApiListener>,
}

impl Listener {
    /// Returns the socket port the listener binds, if it has one.
    pub fn port(&self) -> Option<u32> {
        match self.address.as_ref()?.address.as_ref()? {
            address::Address::SocketAddress(socket) => match socket.port_specifier.as_ref()? {
                socket_address::PortSpecifier::PortValue(port) => Some(*port),
            },
        }
    }
}

/// `envoy.config.listener.v3.ApiListener`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct ApiListener {
    #[prost(message, optional, tag = "1")]
    pub api_listener: Option<Any>,
}

/// `envoy.config.listener.v3.FilterChain`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct FilterChain {
    #[prost(message, repeated, tag = "3")]
    pub filters: Vec<Filter>,
    #[prost(string, tag = "7")]
    pub name: String,
}

/// `envoy.config.listener.v3.Filter`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Filter {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "4")]
    pub typed_config: Option<Any>,
}

/// `envoy.config.core.v3.Address`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Address {
    #[prost(oneof = "address::Address", tags = "1")]
    pub address: Option<address::Address>,
}

/// Nested types for [`Address`].
pub mod address {
    use serde::Serialize;

    /// `envoy.config.core.v3.Address.address`.
    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize)]
    pub enum Address {
        #[prost(message, tag = "1")]
        SocketAddress(super::SocketAddress),
    }
}

/// `envoy.config.core.v3.SocketAddress`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct SocketAddress {
    #[prost(string, tag = "2")]
    pub address: String,
    #[prost(oneof = "socket_address::PortSpecifier", tags = "3")]
    pub port_specifier: Option<socket_address::PortSpecifier>,
}

/// Nested types for [`SocketAddress`].
pub mod socket_address {
    use serde::Serialize;

    /// `envoy.config.core.v3.SocketAddress.port_specifier`.
    #[derive(Clone, Copy, PartialEq, Eq, ::prost::Oneof, Serialize)]
    pub enum PortSpecifier {
        #[prost(uint32, tag = "3")]
        PortValue(u32),
    }
}

/// `envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TcpProxy {
    #[prost(string, tag = "1")]
    pub stat_prefix: String,
    #[prost(oneof = "tcp_proxy::ClusterSpecifier", tags = "2")]
    pub cluster_specifier: Option<tcp_proxy::ClusterSpecifier>,
}

/// Nested types for [`TcpProxy`].
pub mod tcp_proxy {
    /// `envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy.cluster_specifier`.
    #[derive(Clone, PartialEq, Eq, ::prost::Oneof)]
    pub enum ClusterSpecifier {
        #[prost(string, tag = "2")]
        Cluster(String),
    }
}
