//! ADS worker that owns the session.
//!
//! The worker runs as a background task, managing:
//! - The session lifecycle (connection, reconnection with backoff)
//! - Applying responses to the typed caches
//! - ACK/NACK and narrowed follow-up requests
//! - Waking consumers through the notifier
//!
//! It is the only writer of the caches and the protocol state. The shared
//! lock is held for in-memory updates only, never across a network write.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cache::{self, SnapshotFile};
use crate::client::config::{ClientConfig, ResponseHandler, ServerConfig};
use crate::client::notify::Notifier;
use crate::client::protocol::Shared;
use crate::client::supervisor::{ConnectionState, Supervisor};
use crate::codec::XdsCodec;
use crate::error::{Error, Result};
use crate::message::DiscoveryRequest;
use crate::resource::{self, Applied};
use crate::runtime::Runtime;
use crate::transport::{Transport, TransportBuilder, TransportStream};

/// Commands sent from `AdsClient` to the worker.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    /// Send a request on the current session.
    Send {
        request: DiscoveryRequest,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handles the worker shares with the client.
#[derive(Debug)]
pub(crate) struct WorkerChannels {
    pub(crate) shared: Arc<Mutex<Shared>>,
    pub(crate) notifier: Arc<Notifier>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    pub(crate) shutdown: CancellationToken,
}

/// The ADS worker.
pub(crate) struct AdsWorker<TB, C, R> {
    transport_builder: TB,
    codec: C,
    runtime: R,
    server: ServerConfig,
    shared: Arc<Mutex<Shared>>,
    notifier: Arc<Notifier>,
    supervisor: Supervisor,
    command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    shutdown: CancellationToken,
    local_cache_dir: Option<PathBuf>,
    nack_on_decode_error: bool,
    response_handler: Option<ResponseHandler>,
    /// Reports the outcome of the first connect attempt. While set, a failed
    /// attempt is returned to the caller instead of retried.
    first_attempt: Option<oneshot::Sender<Result<()>>>,
}

impl<TB, C, R> AdsWorker<TB, C, R>
where
    TB: TransportBuilder,
    C: XdsCodec,
    R: Runtime,
{
    pub(crate) fn new(
        transport_builder: TB,
        codec: C,
        runtime: R,
        config: ClientConfig,
        channels: WorkerChannels,
    ) -> Self {
        Self {
            transport_builder,
            codec,
            runtime,
            server: config.server,
            shared: channels.shared,
            notifier: channels.notifier,
            supervisor: Supervisor::new(config.retry_policy, channels.state),
            command_rx: channels.command_rx,
            shutdown: channels.shutdown,
            local_cache_dir: config.local_cache_dir,
            nack_on_decode_error: config.nack_on_decode_error,
            response_handler: config.response_handler,
            first_attempt: None,
        }
    }

    pub(crate) fn with_first_attempt(mut self, reply: oneshot::Sender<Result<()>>) -> Self {
        self.first_attempt = Some(reply);
        self
    }

    /// Run until closed, every client handle is dropped, or a bounded retry
    /// policy is exhausted.
    pub(crate) async fn run(mut self) {
        while !self.shutdown.is_cancelled() {
            self.supervisor.connecting();
            match self.connect().await {
                Ok(stream) => {
                    self.supervisor.connected();
                    if let Some(reply) = self.first_attempt.take() {
                        let _ = reply.send(Ok(()));
                    }
                    info!(server = self.server.uri(), "session established");

                    let outcome = self.run_connected(stream).await;
                    self.notifier.session_ended();
                    match outcome {
                        Ok(()) => break,
                        Err(e) => {
                            let delay = self.supervisor.stream_ended();
                            warn!(error = %e, ?delay, "session ended, reconnecting");
                            if self.back_off(delay).await {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    if let Some(reply) = self.first_attempt.take() {
                        let _ = reply.send(Err(e));
                        break;
                    }
                    let Some(delay) = self.supervisor.connect_failed() else {
                        warn!(error = %e, "connect failed, retries exhausted");
                        break;
                    };
                    warn!(error = %e, ?delay, "connect failed, backing off");
                    if self.back_off(delay).await {
                        break;
                    }
                }
            }
        }
        self.supervisor.close();
        self.notifier.close();
        debug!("worker stopped");
    }

    /// Dial, then open a stream carrying the watch set.
    async fn connect(&mut self) -> Result<<TB::Transport as Transport>::Stream> {
        let transport = self.transport_builder.build(&self.server).await?;

        let requests = {
            let mut shared = self.shared.lock();
            shared.protocol.begin_session();
            shared.protocol.initial_requests()
        };
        let initial = requests
            .iter()
            .map(|request| self.codec.encode_request(request))
            .collect::<Result<Vec<_>>>()?;
        debug!(requests = initial.len(), "sending watch set");

        transport.new_stream(initial).await
    }

    /// Sleep before the next attempt. Returns true if shut down meanwhile.
    async fn back_off(&mut self, delay: std::time::Duration) -> bool {
        let sleep = self.runtime.sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return true,
                _ = &mut sleep => return false,
                cmd = self.command_rx.recv() => match cmd {
                    Some(WorkerCommand::Send { reply, .. }) => {
                        let _ = reply.send(Err(Error::StreamClosed));
                    }
                    None => return true,
                },
            }
        }
    }

    /// Run the receive loop while connected.
    ///
    /// Returns `Ok(())` if the worker should shut down.
    /// Returns `Err` if the session ended and the worker should reconnect.
    async fn run_connected<S: TransportStream>(&mut self, mut stream: S) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),

                result = stream.recv() => {
                    match result {
                        Ok(Some(bytes)) => self.handle_response(&mut stream, bytes).await?,
                        Ok(None) => return Err(Error::StreamClosed),
                        Err(e) => return Err(e),
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(WorkerCommand::Send { request, reply }) => {
                            if let Err(e) = self.send_direct(&mut stream, request).await {
                                let _ = reply.send(Err(Error::StreamClosed));
                                return Err(e);
                            }
                            let _ = reply.send(Ok(()));
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn send_direct<S: TransportStream>(
        &self,
        stream: &mut S,
        request: DiscoveryRequest,
    ) -> Result<()> {
        let request = self.shared.lock().protocol.outgoing(request);
        debug!(type_url = %request.type_url, resources = ?request.resource_names, "sending request");
        stream.send(self.codec.encode_request(&request)?).await
    }

    /// Apply one response, then send its follow-up and ACK (or NACK).
    ///
    /// Only stream send failures are returned. Undecodable input is logged
    /// and skipped.
    async fn handle_response<S: TransportStream>(
        &mut self,
        stream: &mut S,
        bytes: Bytes,
    ) -> Result<()> {
        let response = match self.codec.decode_response(bytes) {
            Ok(response) => Arc::new(response),
            Err(e) => {
                warn!(error = %e, "dropping undecodable response");
                return Ok(());
            }
        };
        let type_url = response.type_url.clone();
        debug!(
            type_url = %type_url,
            version = %response.version_info,
            nonce = %response.nonce,
            resources = response.resources.len(),
            "received response"
        );
        if let Some(handler) = &self.response_handler {
            handler.call(&response);
        }

        let kind = resource::lookup(&type_url);
        if kind.is_none() {
            warn!(type_url = %type_url, "unrecognized resource type, acknowledging without applying");
        }
        let applied_type = kind
            .as_ref()
            .filter(|_| !response.resources.is_empty())
            .map(|(resource_type, _)| resource_type.clone());

        let (outgoing, accepted, initial_load, snapshots) = {
            let mut guard = self.shared.lock();
            let Shared { protocol, caches } = &mut *guard;

            let applied = match &kind {
                Some((_, apply)) if applied_type.is_some() => apply(caches, response.as_ref()),
                _ => Applied::default(),
            };
            let accepted = !(self.nack_on_decode_error && !applied.decode_errors.is_empty());
            let initial_load = protocol.record_response(&response, accepted);

            let mut outgoing = Vec::with_capacity(2);
            if let Some(narrowing) = applied.narrowing {
                if let Some(follow_up) =
                    protocol.narrow(&type_url, narrowing.dependent, narrowing.names)
                {
                    outgoing.push(protocol.outgoing(follow_up));
                }
            }
            let reply = if accepted {
                protocol.ack(&type_url)
            } else {
                protocol.nack(&type_url, applied.decode_errors.join("; "))
            };
            outgoing.push(protocol.outgoing(reply));

            let snapshots = match (&self.local_cache_dir, &applied_type) {
                (Some(_), Some(resource_type)) => caches
                    .update_snapshots(resource_type)
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "failed to serialize snapshot");
                        vec![]
                    }),
                _ => vec![],
            };
            (outgoing, accepted, initial_load, snapshots)
        };

        for request in &outgoing {
            trace!(
                type_url = %request.type_url,
                version = %request.version_info,
                nonce = %request.response_nonce,
                resources = ?request.resource_names,
                nack = request.is_nack(),
                "sending request"
            );
            stream.send(self.codec.encode_request(request)?).await?;
        }

        if let Some(resource_type) = applied_type {
            self.notifier.publish_update(resource_type);
        }
        if accepted {
            self.notifier.publish_response(response);
        }
        self.notifier.processed();

        if let Some(elapsed) = initial_load {
            info!(?elapsed, "initial load complete");
        }
        self.write_snapshots(snapshots).await;
        Ok(())
    }

    async fn write_snapshots(&self, files: Vec<SnapshotFile>) {
        let Some(base) = &self.local_cache_dir else {
            return;
        };
        if files.is_empty() {
            return;
        }
        if let Err(e) = cache::write_snapshots(base, files).await {
            warn!(base = %base.display(), error = %e, "failed to write snapshot");
        }
    }
}
