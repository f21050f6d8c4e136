//! Configuration for the ADS client.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;

use crate::client::retry::RetryPolicy;
use crate::message::{DiscoveryResponse, Locality, Node};
use crate::resource::{self, Gvk};

/// Metadata key carrying the proxy version the server tailors responses to.
pub const PROXY_VERSION_KEY: &str = "ISTIO_VERSION";

/// Proxy version reported when the caller does not supply one.
pub const DEFAULT_PROXY_VERSION: &str = "65536.65536.65536";

/// Configuration for the ADS client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The discovery server to connect to.
    pub server: ServerConfig,

    /// Identity reported to the server.
    pub node: NodeIdentity,

    /// Resource types requested on every new session.
    pub watch: WatchSet,

    /// Backoff behavior when reconnecting to the server.
    pub retry_policy: RetryPolicy,

    /// Base path for diagnostic JSON snapshots of the caches.
    ///
    /// Snapshot files are named by appending a kind suffix, e.g.
    /// `<base>_cds.json`. Disabled when `None`.
    pub local_cache_dir: Option<PathBuf>,

    /// NACK a batch when any of its resources fails to decode.
    ///
    /// Off by default: every processed batch is ACKed.
    pub nack_on_decode_error: bool,

    /// Called with every decoded response before it is applied.
    pub response_handler: Option<ResponseHandler>,
}

impl ClientConfig {
    /// Create a configuration watching the Envoy type set.
    ///
    /// # Example
    ///
    /// ```
    /// use ads_client::{ClientConfig, NodeIdentity};
    ///
    /// let node = NodeIdentity::default()
    ///     .with_ip("10.0.0.1".parse().unwrap())
    ///     .with_workload("reviews-v1");
    /// let config = ClientConfig::new(node, "http://istiod.istio-system:15010");
    /// assert_eq!(config.watch.len(), 4);
    /// ```
    pub fn new(node: NodeIdentity, server_uri: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::new(server_uri),
            node,
            watch: WatchSet::envoy(),
            retry_policy: RetryPolicy::default(),
            local_cache_dir: None,
            nack_on_decode_error: false,
            response_handler: None,
        }
    }

    /// Set the watch set.
    pub fn with_watch(mut self, watch: WatchSet) -> Self {
        self.watch = watch;
        self
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Enable diagnostic snapshots under the given base path.
    pub fn with_local_cache_dir(mut self, base: impl Into<PathBuf>) -> Self {
        self.local_cache_dir = Some(base.into());
        self
    }

    /// Send a NACK instead of an ACK when a batch has undecodable resources.
    pub fn with_nack_on_decode_error(mut self, enabled: bool) -> Self {
        self.nack_on_decode_error = enabled;
        self
    }

    /// Observe every response the server sends.
    ///
    /// The handler runs on the worker task, so it must not block.
    pub fn with_response_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&DiscoveryResponse) + Send + Sync + 'static,
    {
        self.response_handler = Some(ResponseHandler(Arc::new(handler)));
        self
    }
}

/// Callback invoked with each response, see [`ClientConfig::with_response_handler`].
#[derive(Clone)]
pub struct ResponseHandler(Arc<dyn Fn(&DiscoveryResponse) + Send + Sync>);

impl ResponseHandler {
    pub(crate) fn call(&self, response: &DiscoveryResponse) {
        (self.0)(response)
    }
}

impl fmt::Debug for ResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseHandler(<fn>)")
    }
}

/// Configuration for the discovery server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    uri: String,
}

impl ServerConfig {
    /// Create a server configuration. A bare `host:port` is accepted.
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// Returns the server URI as configured.
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// The role a proxy plays in the mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProxyType {
    /// Sidecar next to a workload.
    #[default]
    Sidecar,
    /// Standalone gateway.
    Router,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Sidecar => f.write_str("sidecar"),
            ProxyType::Router => f.write_str("router"),
        }
    }
}

/// Inputs to the node identity string and node metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeIdentity {
    /// Proxy role.
    pub proxy_type: ProxyType,
    /// Address the proxy reports.
    pub ip: IpAddr,
    /// Workload name.
    pub workload: String,
    /// Namespace.
    pub namespace: String,
    /// Cluster domain suffix.
    pub domain_suffix: String,
    /// String metadata sent with the node.
    pub metadata: BTreeMap<String, String>,
    /// Where the proxy runs.
    pub locality: Option<Locality>,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            proxy_type: ProxyType::Sidecar,
            ip: private_ip(),
            workload: "test-1".to_string(),
            namespace: "default".to_string(),
            domain_suffix: "cluster.local".to_string(),
            metadata: BTreeMap::new(),
            locality: None,
        }
    }
}

impl NodeIdentity {
    /// Set the proxy role.
    pub fn with_proxy_type(mut self, proxy_type: ProxyType) -> Self {
        self.proxy_type = proxy_type;
        self
    }

    /// Set the reported IP.
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = ip;
        self
    }

    /// Set the workload name.
    pub fn with_workload(mut self, workload: impl Into<String>) -> Self {
        self.workload = workload.into();
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the cluster domain suffix.
    pub fn with_domain_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.domain_suffix = suffix.into();
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the locality.
    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = Some(locality);
        self
    }

    /// Returns the identity string, `{type}~{ip}~{workload}.{ns}~{ns}.svc.{domain}`.
    ///
    /// ```
    /// use ads_client::NodeIdentity;
    ///
    /// let node = NodeIdentity::default().with_ip("10.1.2.3".parse().unwrap());
    /// assert_eq!(node.id(), "sidecar~10.1.2.3~test-1.default~default.svc.cluster.local");
    /// ```
    pub fn id(&self) -> String {
        format!(
            "{}~{}~{}.{}~{}.svc.{}",
            self.proxy_type,
            self.ip,
            self.workload,
            self.namespace,
            self.namespace,
            self.domain_suffix
        )
    }

    /// Build the node sent on the first request of each session.
    pub fn to_node(&self) -> Node {
        let mut node = Node::new(self.id());
        node.metadata = self.metadata.clone();
        node.metadata
            .entry(PROXY_VERSION_KEY.to_string())
            .or_insert_with(|| DEFAULT_PROXY_VERSION.to_string());
        node.locality = self.locality.clone();
        node
    }
}

/// The host's private IPv4 address, or `0.0.0.0` if none is found.
///
/// Connecting a UDP socket sends nothing; it only selects the outbound interface.
fn private_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(IpAddr::V4(ip)) if ip.is_private() => IpAddr::V4(ip),
        _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    }
}

/// The ordered list of type URLs requested on every session.
///
/// Immutable once built; cloning shares the same list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSet(Arc<[String]>);

impl WatchSet {
    /// Create a watch set from type URLs.
    pub fn new<I, S>(type_urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(type_urls.into_iter().map(Into::into).collect())
    }

    /// Clusters, endpoints, listeners and routes.
    pub fn envoy() -> Self {
        Self::new([
            resource::CLUSTER,
            resource::ENDPOINT,
            resource::LISTENER,
            resource::ROUTE,
        ])
    }

    /// The mesh config followed by the given config types.
    pub fn config<'a>(types: impl IntoIterator<Item = &'a Gvk>) -> Self {
        Self::new(
            std::iter::once(resource::MESH_CONFIG.to_string())
                .chain(types.into_iter().map(Gvk::type_url)),
        )
    }

    /// Returns a new set with `type_url` appended.
    pub fn with(&self, type_url: impl Into<String>) -> Self {
        Self(self.0.iter().cloned().chain([type_url.into()]).collect())
    }

    /// Iterate over the type URLs in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of types watched.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_metadata_keeps_caller_version() {
        let node = NodeIdentity::default()
            .with_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_metadata(PROXY_VERSION_KEY, "1.20.0")
            .to_node();
        assert_eq!(node.metadata[PROXY_VERSION_KEY], "1.20.0");

        let node = NodeIdentity::default()
            .with_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .to_node();
        assert_eq!(node.metadata[PROXY_VERSION_KEY], DEFAULT_PROXY_VERSION);
    }

    #[test]
    fn test_router_identity() {
        let node = NodeIdentity::default()
            .with_proxy_type(ProxyType::Router)
            .with_ip("10.10.0.7".parse().unwrap())
            .with_workload("ingressgateway")
            .with_namespace("istio-system")
            .with_domain_suffix("mesh.internal");
        assert_eq!(
            node.id(),
            "router~10.10.0.7~ingressgateway.istio-system~istio-system.svc.mesh.internal"
        );
    }

    #[test]
    fn test_watch_set_order() {
        let gvk = Gvk::new("networking.istio.io", "v1alpha3", "Sidecar");
        let watch = WatchSet::config([&gvk]).with(resource::CLUSTER);
        assert_eq!(
            watch.iter().collect::<Vec<_>>(),
            vec![
                resource::MESH_CONFIG,
                "networking.istio.io/v1alpha3/Sidecar",
                resource::CLUSTER
            ]
        );
    }
}
