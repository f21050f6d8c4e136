//! `tonic` based transport.
//!
//! Uses tonic's low-level `Grpc` client with a pass-through codec, so the
//! worker owns message (de)serialization.

use crate::client::config::ServerConfig;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportBuilder, TransportStream};
use bytes::{Buf, BufMut, Bytes};
use http::uri::PathAndQuery;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt as _;
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::{Status, Streaming};
use tracing::debug;

/// The gRPC path for the ADS StreamAggregatedResources RPC.
const ADS_PATH: &str =
    "/envoy.service.discovery.v3.AggregatedDiscoveryService/StreamAggregatedResources";

const ADS_CHANNEL_BUFFER_SIZE: usize = 16;

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(20);

/// Passes message bytes through untouched.
#[derive(Debug, Clone, Copy)]
struct BytesCodec;

impl Codec for BytesCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = BytesEncoder;
    type Decoder = BytesDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        BytesEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        BytesDecoder
    }
}

#[derive(Debug)]
struct BytesEncoder;

impl Encoder for BytesEncoder {
    type Item = Bytes;
    type Error = Status;

    fn encode(
        &mut self,
        item: Self::Item,
        dst: &mut EncodeBuf<'_>,
    ) -> std::result::Result<(), Self::Error> {
        dst.put_slice(&item);
        Ok(())
    }
}

#[derive(Debug)]
struct BytesDecoder;

impl Decoder for BytesDecoder {
    type Item = Bytes;
    type Error = Status;

    fn decode(
        &mut self,
        src: &mut DecodeBuf<'_>,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        Ok(Some(src.copy_to_bytes(src.remaining())))
    }
}

/// An established tonic channel to the discovery server.
#[derive(Clone, Debug)]
pub struct TonicTransport {
    channel: Channel,
}

impl TonicTransport {
    /// Wrap an existing tonic [`Channel`].
    pub fn from_channel(channel: Channel) -> Self {
        Self { channel }
    }
}

/// Dials the discovery server with tonic, plaintext or TLS.
///
/// # Example
///
/// ```no_run
/// use ads_client::credentials::{Credentials, TlsOptions};
/// use ads_client::transport::tonic::TonicTransportBuilder;
///
/// let credentials = Credentials::Tls(
///     TlsOptions::new()
///         .with_cert_dir("/etc/certs")
///         .with_server_name("istiod.istio-system.svc"),
/// );
/// let builder = TonicTransportBuilder::new(credentials)?;
/// # Ok::<(), ads_client::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct TonicTransportBuilder {
    credentials: Credentials,
    keep_alive: Duration,
}

impl TonicTransportBuilder {
    /// Create a builder, checking file-based credential material up front.
    pub fn new(credentials: Credentials) -> Result<Self> {
        credentials.validate()?;
        Ok(Self {
            credentials,
            keep_alive: DEFAULT_KEEP_ALIVE,
        })
    }

    /// Plaintext transport.
    pub fn insecure() -> Self {
        Self {
            credentials: Credentials::Insecure,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    /// HTTP/2 keep-alive interval for TLS connections.
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }
}

/// Add a scheme to a bare `host:port`.
fn endpoint_uri(uri: &str, tls: bool) -> String {
    if uri.contains("://") {
        uri.to_string()
    } else if tls {
        format!("https://{uri}")
    } else {
        format!("http://{uri}")
    }
}

impl TransportBuilder for TonicTransportBuilder {
    type Transport = TonicTransport;

    async fn build(&self, server: &ServerConfig) -> Result<Self::Transport> {
        let material = match &self.credentials {
            Credentials::Insecure => None,
            Credentials::Tls(options) => Some(options.resolve().await?),
        };

        let uri = endpoint_uri(server.uri(), material.is_some());
        let mut endpoint =
            Endpoint::from_shared(uri).map_err(|e| Error::Connection(e.to_string()))?;

        if let Some(material) = material {
            let mut tls = ClientTlsConfig::new();
            if let Some(root) = material.root_cert {
                tls = tls.ca_certificate(Certificate::from_pem(root));
            }
            if let Some((chain, key)) = material.identity {
                tls = tls.identity(Identity::from_pem(chain, key));
            }
            if let Some(name) = material.server_name {
                tls = tls.domain_name(name);
            }
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| Error::Credential(e.to_string()))?
                .http2_keep_alive_interval(self.keep_alive)
                .keep_alive_while_idle(true);
        }

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        debug!(uri = server.uri(), "connected");
        Ok(TonicTransport::from_channel(channel))
    }
}

impl Transport for TonicTransport {
    type Stream = TonicAdsStream;

    async fn new_stream(&self, initial_requests: Vec<Bytes>) -> Result<Self::Stream> {
        let mut grpc = Grpc::new(self.channel.clone());

        grpc.ready()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<Bytes>(ADS_CHANNEL_BUFFER_SIZE);

        // Initial requests must be readable before the call resolves: some
        // servers withhold response headers until the first message arrives.
        let initial_stream = tokio_stream::iter(initial_requests);
        let channel_stream = tokio_stream::wrappers::ReceiverStream::new(rx);
        let request_stream = initial_stream.chain(channel_stream);

        let path = PathAndQuery::from_static(ADS_PATH);

        let response = grpc
            .streaming(tonic::Request::new(request_stream), path, BytesCodec)
            .await
            .map_err(Error::Stream)?;

        Ok(TonicAdsStream {
            sender: tx,
            receiver: response.into_inner(),
        })
    }
}

/// One ADS session over tonic.
#[derive(Debug)]
pub struct TonicAdsStream {
    sender: mpsc::Sender<Bytes>,
    receiver: Streaming<Bytes>,
}

impl TransportStream for TonicAdsStream {
    async fn send(&mut self, request: Bytes) -> Result<()> {
        self.sender
            .send(request)
            .await
            .map_err(|_| Error::StreamClosed)?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Bytes>> {
        match self.receiver.message().await {
            Ok(msg) => Ok(msg),
            Err(status) => Err(Error::Stream(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::TlsOptions;

    #[test]
    fn test_endpoint_uri_scheme() {
        assert_eq!(endpoint_uri("istiod:15010", false), "http://istiod:15010");
        assert_eq!(endpoint_uri("istiod:15012", true), "https://istiod:15012");
        assert_eq!(
            endpoint_uri("http://localhost:15010", true),
            "http://localhost:15010"
        );
    }

    #[test]
    fn test_builder_rejects_missing_cert_dir() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = Credentials::Tls(TlsOptions::new().with_cert_dir(dir.path()));
        assert!(matches!(
            TonicTransportBuilder::new(credentials),
            Err(Error::Credential(_))
        ));
        assert!(TonicTransportBuilder::new(Credentials::Insecure).is_ok());
    }

    #[tokio::test]
    async fn test_dial_failure_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TonicTransportBuilder::insecure()
            .build(&ServerConfig::new(addr.to_string()))
            .await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
