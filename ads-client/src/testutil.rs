//! In-memory transport and resource builders for driving the client in tests.
//!
//! [`mock_transport`] returns a transport builder to hand to the client and
//! the [`MockServer`] end that accepts its sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use tokio::sync::mpsc;

use crate::client::config::ServerConfig;
use crate::error::{Error, Result};
use crate::proto::Any;
use crate::proto::cluster::{Cluster, cluster};
use crate::proto::config::{Metadata, Resource};
use crate::proto::discovery::{DiscoveryRequest, DiscoveryResponse};
use crate::proto::endpoint::ClusterLoadAssignment;
use crate::proto::listener::{
    Address, Filter, FilterChain, Listener, SocketAddress, TcpProxy, address, socket_address,
    tcp_proxy,
};
use crate::proto::route::RouteConfiguration;
use crate::resource;
use crate::runtime::Runtime;
use crate::transport::{Transport, TransportBuilder, TransportStream};

/// How long [`MockServer`] and [`MockSession`] wait before failing a test.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bytes that are not a valid resource message.
pub const MALFORMED: &[u8] = &[0x0a, 0x05, 0x61];

/// Create a connected transport builder and server pair.
pub fn mock_transport() -> (MockTransportBuilder, MockServer) {
    let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
    let failures = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::new(AtomicUsize::new(0));
    (
        MockTransportBuilder {
            sessions_tx,
            failures: Arc::clone(&failures),
            attempts: Arc::clone(&attempts),
        },
        MockServer {
            sessions_rx,
            failures,
            attempts,
        },
    )
}

/// Client side of the in-memory transport.
#[derive(Debug, Clone)]
pub struct MockTransportBuilder {
    sessions_tx: mpsc::UnboundedSender<MockSession>,
    failures: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl TransportBuilder for MockTransportBuilder {
    type Transport = MockTransport;

    async fn build(&self, _server: &ServerConfig) -> Result<Self::Transport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::Connection("mock dial failure".into()));
        }
        Ok(MockTransport {
            sessions_tx: self.sessions_tx.clone(),
        })
    }
}

/// A dialed in-memory connection.
#[derive(Debug)]
pub struct MockTransport {
    sessions_tx: mpsc::UnboundedSender<MockSession>,
}

impl Transport for MockTransport {
    type Stream = MockStream;

    async fn new_stream(&self, initial_requests: Vec<Bytes>) -> Result<Self::Stream> {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        for request in initial_requests {
            let _ = requests_tx.send(request);
        }
        self.sessions_tx
            .send(MockSession {
                requests: requests_rx,
                responses: responses_tx,
            })
            .map_err(|_| Error::Connection("mock server gone".into()))?;
        Ok(MockStream {
            requests: requests_tx,
            responses: responses_rx,
        })
    }
}

/// Client end of one in-memory session.
#[derive(Debug)]
pub struct MockStream {
    requests: mpsc::UnboundedSender<Bytes>,
    responses: mpsc::UnboundedReceiver<Bytes>,
}

impl TransportStream for MockStream {
    async fn send(&mut self, request: Bytes) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| Error::StreamClosed)
    }

    async fn recv(&mut self) -> Result<Option<Bytes>> {
        Ok(self.responses.recv().await)
    }
}

/// Server side of the in-memory transport.
#[derive(Debug)]
pub struct MockServer {
    sessions_rx: mpsc::UnboundedReceiver<MockSession>,
    failures: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl MockServer {
    /// Accept the next session.
    ///
    /// # Panics
    ///
    /// Panics if no session is opened in time.
    pub async fn accept(&mut self) -> MockSession {
        tokio::time::timeout(TEST_TIMEOUT, self.sessions_rx.recv())
            .await
            .expect("timed out waiting for a session")
            .expect("transport builder dropped")
    }

    /// Make the next `n` dial attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Number of dial attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Server end of one in-memory session.
#[derive(Debug)]
pub struct MockSession {
    requests: mpsc::UnboundedReceiver<Bytes>,
    responses: mpsc::UnboundedSender<Bytes>,
}

impl MockSession {
    /// Receive and decode the next request.
    ///
    /// # Panics
    ///
    /// Panics if no request arrives in time or it does not decode.
    pub async fn next_request(&mut self) -> DiscoveryRequest {
        let bytes = tokio::time::timeout(TEST_TIMEOUT, self.requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("client stream closed");
        DiscoveryRequest::decode(bytes).expect("request decodes")
    }

    /// Receive the next `n` requests.
    pub async fn next_requests(&mut self, n: usize) -> Vec<DiscoveryRequest> {
        let mut requests = Vec::with_capacity(n);
        for _ in 0..n {
            requests.push(self.next_request().await);
        }
        requests
    }

    /// A request already queued, without waiting.
    pub fn try_next_request(&mut self) -> Option<DiscoveryRequest> {
        let bytes = self.requests.try_recv().ok()?;
        DiscoveryRequest::decode(bytes).ok()
    }

    /// Push a response to the client.
    pub fn respond(&self, type_url: &str, version: &str, nonce: &str, resources: Vec<Any>) {
        self.respond_raw(
            DiscoveryResponse {
                version_info: version.to_string(),
                resources,
                canary: false,
                type_url: type_url.to_string(),
                nonce: nonce.to_string(),
            }
            .encode_to_vec()
            .into(),
        );
    }

    /// Push raw bytes to the client.
    pub fn respond_raw(&self, bytes: Bytes) {
        let _ = self.responses.send(bytes);
    }

    /// End the session as a clean close.
    pub fn close(self) {}
}

/// A runtime that records requested sleeps and returns from them at once.
#[derive(Debug, Clone, Default)]
pub struct RecordingRuntime {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingRuntime {
    /// The sleeps requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Runtime for RecordingRuntime {
    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

fn any(type_url: &str, message: &impl Message) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}

/// An undecodable resource of the given type.
pub fn malformed(type_url: &str) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: MALFORMED.to_vec(),
    }
}

/// A cluster; `eds` selects endpoint discovery over static membership.
pub fn cluster(name: &str, eds: bool) -> Any {
    let discovery_type = if eds {
        cluster::discovery_type::EDS
    } else {
        cluster::discovery_type::STATIC
    };
    any(
        resource::CLUSTER,
        &Cluster {
            name: name.to_string(),
            cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(discovery_type)),
            eds_cluster_config: None,
        },
    )
}

fn listener(name: &str, port: u32, filter: Filter) -> Listener {
    Listener {
        name: name.to_string(),
        address: Some(Address {
            address: Some(address::Address::SocketAddress(SocketAddress {
                address: "0.0.0.0".to_string(),
                port_specifier: Some(socket_address::PortSpecifier::PortValue(port)),
            })),
        }),
        filter_chains: vec![FilterChain {
            filters: vec![filter],
            name: String::new(),
        }],
        api_listener: None,
    }
}

/// A listener whose only filter is the HTTP connection manager.
pub fn http_listener(name: &str, port: u32) -> Any {
    let filter = Filter {
        name: "envoy.filters.network.http_connection_manager".to_string(),
        typed_config: None,
    };
    any(resource::LISTENER, &listener(name, port, filter))
}

/// A listener whose only filter is a TCP proxy to `cluster`.
pub fn tcp_listener(name: &str, port: u32, cluster: &str) -> Any {
    let proxy = TcpProxy {
        stat_prefix: cluster.to_string(),
        cluster_specifier: Some(tcp_proxy::ClusterSpecifier::Cluster(cluster.to_string())),
    };
    let filter = Filter {
        name: "envoy.filters.network.tcp_proxy".to_string(),
        typed_config: Some(any(
            "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy",
            &proxy,
        )),
    };
    any(resource::LISTENER, &listener(name, port, filter))
}

/// A route configuration with no virtual hosts.
pub fn route(name: &str) -> Any {
    any(
        resource::ROUTE,
        &RouteConfiguration {
            name: name.to_string(),
            virtual_hosts: vec![],
        },
    )
}

/// An endpoint assignment with no endpoints.
pub fn endpoints(cluster_name: &str) -> Any {
    any(
        resource::ENDPOINT,
        &ClusterLoadAssignment {
            cluster_name: cluster_name.to_string(),
            endpoints: vec![],
        },
    )
}

/// A generic config object named `namespace/name`.
pub fn config_resource(type_url: &str, full_name: &str, version: &str) -> Any {
    any(
        type_url,
        &Resource {
            metadata: Some(Metadata {
                name: full_name.to_string(),
                create_time: None,
                version: version.to_string(),
                labels: Default::default(),
                annotations: Default::default(),
            }),
            body: Some(prost_types::Any {
                type_url: format!("type.googleapis.com/{type_url}"),
                value: vec![],
            }),
        },
    )
}
