//! A service-mesh [ADS](https://www.envoyproxy.io/docs/envoy/latest/api-docs/xds_protocol) client.
//!
//! The client keeps one aggregated discovery stream open to a discovery
//! server and mirrors what it receives into typed caches:
//! - listeners, split into HTTP and TCP
//! - clusters, split into endpoint-discovered and static
//! - route configurations and endpoint assignments
//! - generic `group/version/kind` config objects and the mesh config
//!
//! It handles:
//! - Session management (connection, reconnection with backoff, replay of the watch set)
//! - Version/nonce tracking and ACK (optionally NACK)
//! - Narrowing dependent subscriptions: routes follow the HTTP listeners,
//!   endpoints follow the endpoint-discovered clusters
//! - Waking consumers that wait for updates, with timeouts
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use ads_client::{
//!     AdsClient, ClientConfig, Credentials, NodeIdentity, ProstCodec, ResourceType,
//!     TokioRuntime, TonicTransportBuilder,
//! };
//!
//! # async fn run() -> ads_client::Result<()> {
//! let node = NodeIdentity::default().with_workload("reviews-v1");
//! let config = ClientConfig::new(node, "istiod.istio-system:15010");
//! let transport = TonicTransportBuilder::new(Credentials::Insecure)?;
//!
//! let client = AdsClient::builder(config, transport, ProstCodec, TokioRuntime)
//!     .connect()
//!     .await?;
//!
//! client
//!     .wait(Duration::from_secs(30), &[ResourceType::Route])
//!     .await?;
//! for (name, cluster) in client.eds_clusters() {
//!     println!("{name}: {cluster:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `transport-tonic`: Enables the `tonic` transport. Enabled by default.
//! - `test-util`: Exposes the in-memory transport and resource builders in [`testutil`].

pub mod cache;
pub mod client;
pub mod codec;
pub mod credentials;
pub mod error;
pub mod message;
pub mod proto;
pub mod resource;
pub mod runtime;
#[cfg(any(test, feature = "test-util"))]
pub mod testutil;
pub mod transport;

pub use cache::{ConfigKey, ConfigObject, MeshConfig};
pub use client::config::{
    ClientConfig, DEFAULT_PROXY_VERSION, NodeIdentity, PROXY_VERSION_KEY, ProxyType,
    ResponseHandler, ServerConfig, WatchSet,
};
pub use client::protocol::TypeSyncState;
pub use client::retry::{Backoff, RetryPolicy};
pub use client::supervisor::ConnectionState;
pub use client::{AdsClient, AdsClientBuilder};
pub use codec::XdsCodec;
pub use codec::prost::ProstCodec;
pub use credentials::{Credentials, SecretItem, SecretProvider, TlsOptions};
pub use error::{Error, Result};
pub use message::{DiscoveryRequest, DiscoveryResponse, ErrorDetail, Locality, Node, ResourceAny};
pub use resource::{Gvk, ResourceType};
pub use runtime::Runtime;
pub use runtime::tokio::TokioRuntime;
pub use transport::{Transport, TransportBuilder, TransportStream};

// Tonic transport
#[cfg(feature = "transport-tonic")]
pub use transport::tonic::{TonicTransport, TonicTransportBuilder};
