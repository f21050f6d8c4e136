//! Client handle through which consumers read the caches and wait for updates.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::{self, ConfigObject, MeshConfig, TypedCaches};
use crate::client::config::ClientConfig;
use crate::client::notify::Notifier;
use crate::client::protocol::{Protocol, Shared, TypeSyncState};
use crate::client::supervisor::ConnectionState;
use crate::client::worker::{AdsWorker, WorkerChannels, WorkerCommand};
use crate::codec::XdsCodec;
use crate::error::{Error, Result};
use crate::message::{DiscoveryRequest, DiscoveryResponse};
use crate::proto::cluster::Cluster;
use crate::proto::endpoint::ClusterLoadAssignment;
use crate::proto::listener::Listener;
use crate::proto::route::RouteConfiguration;
use crate::resource::{Gvk, ResourceType};
use crate::runtime::Runtime;
use crate::transport::TransportBuilder;

pub mod config;
pub(crate) mod notify;
pub(crate) mod protocol;
pub mod retry;
pub(crate) mod supervisor;
pub(crate) mod worker;

#[cfg(test)]
mod tests;

/// Builder for [`AdsClient`].
#[derive(Debug)]
pub struct AdsClientBuilder<TB, C, R> {
    config: ClientConfig,
    transport_builder: TB,
    codec: C,
    runtime: R,
}

impl<TB, C, R> AdsClientBuilder<TB, C, R>
where
    TB: TransportBuilder,
    C: XdsCodec,
    R: Runtime,
{
    /// Create a new builder with the given configuration, transport builder, codec, and runtime.
    pub fn new(config: ClientConfig, transport_builder: TB, codec: C, runtime: R) -> Self {
        Self {
            config,
            transport_builder,
            codec,
            runtime,
        }
    }

    /// Start the background worker without waiting for a session.
    ///
    /// Every connect failure, including the first, is retried with backoff.
    pub fn start(self) -> AdsClient {
        self.spawn(None)
    }

    /// Start the background worker and wait for the first session.
    ///
    /// A failure of the first connect attempt is returned and the worker
    /// stops. Once connected, later failures are retried with backoff.
    pub async fn connect(self) -> Result<AdsClient> {
        let (tx, rx) = oneshot::channel();
        let client = self.spawn(Some(tx));
        match rx.await {
            Ok(Ok(())) => Ok(client),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Closed),
        }
    }

    fn spawn(self, first_attempt: Option<oneshot::Sender<Result<()>>>) -> AdsClient {
        let node_id = self.config.node.id();
        let shared = Arc::new(Mutex::new(Shared {
            protocol: Protocol::new(self.config.node.to_node(), self.config.watch.clone()),
            caches: TypedCaches::default(),
        }));
        let notifier = Arc::new(Notifier::new());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let mut worker = AdsWorker::new(
            self.transport_builder,
            self.codec,
            self.runtime.clone(),
            self.config,
            WorkerChannels {
                shared: Arc::clone(&shared),
                notifier: Arc::clone(&notifier),
                state: state_tx,
                command_rx,
                shutdown: shutdown.clone(),
            },
        );
        if let Some(reply) = first_attempt {
            worker = worker.with_first_attempt(reply);
        }

        let span = tracing::info_span!("ads", node = %node_id);
        self.runtime.spawn(worker.run().instrument(span));

        AdsClient {
            inner: Arc::new(Inner {
                shared,
                notifier,
                command_tx,
                state: state_rx,
                shutdown,
                node_id,
            }),
        }
    }
}

#[derive(Debug)]
struct Inner {
    shared: Arc<Mutex<Shared>>,
    notifier: Arc<Notifier>,
    command_tx: mpsc::UnboundedSender<WorkerCommand>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    node_id: String,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The ADS client.
///
/// A handle to the background worker that owns the session. Cloning shares
/// the same worker and caches. The worker stops on [`close`](Self::close) or
/// when the last handle is dropped.
///
/// Accessors return snapshots taken under the client's lock; waits always
/// take a timeout.
#[derive(Clone, Debug)]
pub struct AdsClient {
    inner: Arc<Inner>,
}

impl AdsClient {
    /// Create a new builder with the given configuration, transport builder, codec, and runtime.
    pub fn builder<TB, C, R>(
        config: ClientConfig,
        transport_builder: TB,
        codec: C,
        runtime: R,
    ) -> AdsClientBuilder<TB, C, R>
    where
        TB: TransportBuilder,
        C: XdsCodec,
        R: Runtime,
    {
        AdsClientBuilder::new(config, transport_builder, codec, runtime)
    }

    /// The node identity string sent to the server.
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Wait until an update for every type in `wanted` has been applied, or
    /// for any update when `wanted` is empty. Returns the observed types in
    /// order.
    ///
    /// Fails with [`Error::Timeout`] listing the types still missing, or
    /// [`Error::Closed`] when the session ends or the client is closed.
    pub async fn wait(
        &self,
        timeout: Duration,
        wanted: &[ResourceType],
    ) -> Result<Vec<ResourceType>> {
        self.inner.notifier.wait(timeout, wanted).await
    }

    /// Wait for a response for `type_url` whose version differs from `baseline`.
    ///
    /// Returns the last accepted response immediately if its version already
    /// differs from `baseline`, which includes an empty `baseline`.
    pub async fn wait_for_version(
        &self,
        timeout: Duration,
        type_url: &str,
        baseline: &str,
    ) -> Result<Arc<DiscoveryResponse>> {
        let cached = self.inner.shared.lock().protocol.received(type_url);
        self.inner
            .notifier
            .wait_for_version(timeout, type_url, baseline, cached)
            .await
    }

    /// True once a request was sent and every watched type has had a
    /// response. Stays true across reconnects.
    pub fn has_synced(&self) -> bool {
        self.inner.shared.lock().protocol.has_synced()
    }

    /// Wait until [`has_synced`](Self::has_synced), returning false on timeout or close.
    pub async fn wait_for_sync(&self, timeout: Duration) -> bool {
        let shared = Arc::clone(&self.inner.shared);
        self.inner
            .notifier
            .wait_until(timeout, move || shared.lock().protocol.has_synced())
            .await
    }

    /// Send a request on the current session.
    ///
    /// The request goes through the same path as the client's own requests:
    /// it carries the node if it is the first of the session, and is recorded
    /// as the last request sent for its type.
    pub async fn send(&self, request: DiscoveryRequest) -> Result<()> {
        if self.inner.notifier.is_closed() {
            return Err(Error::Closed);
        }
        let (reply, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(WorkerCommand::Send { request, reply })
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Listeners classified as HTTP, by name.
    pub fn http_listeners(&self) -> IndexMap<String, Arc<Listener>> {
        self.inner.shared.lock().caches.http_listeners.clone()
    }

    /// Listeners classified as TCP, by name.
    pub fn tcp_listeners(&self) -> IndexMap<String, Arc<Listener>> {
        self.inner.shared.lock().caches.tcp_listeners.clone()
    }

    /// Clusters whose endpoints come from endpoint discovery, by name.
    pub fn eds_clusters(&self) -> IndexMap<String, Arc<Cluster>> {
        self.inner.shared.lock().caches.eds_clusters.clone()
    }

    /// All other clusters, by name.
    pub fn clusters(&self) -> IndexMap<String, Arc<Cluster>> {
        self.inner.shared.lock().caches.clusters.clone()
    }

    /// Route configurations, by name.
    pub fn routes(&self) -> IndexMap<String, Arc<RouteConfiguration>> {
        self.inner.shared.lock().caches.routes.clone()
    }

    /// Endpoint assignments, by cluster name.
    pub fn endpoints(&self) -> IndexMap<String, Arc<ClusterLoadAssignment>> {
        self.inner.shared.lock().caches.endpoints.clone()
    }

    /// Config objects of one kind.
    pub fn configs(&self, gvk: &Gvk) -> Vec<Arc<ConfigObject>> {
        self.inner
            .shared
            .lock()
            .caches
            .configs
            .get(gvk)
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One config object by kind, namespace and name.
    pub fn config(&self, gvk: &Gvk, namespace: &str, name: &str) -> Option<Arc<ConfigObject>> {
        let shared = self.inner.shared.lock();
        shared
            .caches
            .configs
            .get(gvk)?
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// The mesh-wide config, once received.
    pub fn mesh_config(&self) -> Option<Arc<MeshConfig>> {
        self.inner.shared.lock().caches.mesh.clone()
    }

    /// The last accepted response for `type_url`, under either spelling.
    pub fn received(&self, type_url: &str) -> Option<Arc<DiscoveryResponse>> {
        self.inner.shared.lock().protocol.received(type_url)
    }

    /// The last request sent for `type_url`.
    pub fn sent(&self, type_url: &str) -> Option<DiscoveryRequest> {
        self.inner.shared.lock().protocol.sent(type_url)
    }

    /// Version and nonce last processed per type URL.
    pub fn sync_state(&self) -> HashMap<String, TypeSyncState> {
        self.inner.shared.lock().protocol.sync_state()
    }

    /// Time from the first watch request to the first applied route response.
    pub fn initial_load(&self) -> Option<Duration> {
        self.inner.shared.lock().protocol.initial_load()
    }

    /// Endpoint assignments as pretty JSON.
    pub fn endpoints_json(&self) -> Result<String> {
        self.inner.shared.lock().caches.endpoints_json()
    }

    /// Write the full cache set as JSON files named `<base>_<kind>.json`.
    pub async fn save(&self, base: impl AsRef<Path>) -> Result<()> {
        let files = self.inner.shared.lock().caches.full_snapshot()?;
        cache::write_snapshots(base.as_ref(), files).await
    }

    /// Observe the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Tear down the session and stop reconnecting.
    ///
    /// Pending and future waits return [`Error::Closed`]. The caches keep
    /// their last contents. Idempotent.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.notifier.close();
    }
}
