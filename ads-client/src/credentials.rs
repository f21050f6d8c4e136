//! Transport credentials.
//!
//! TLS material comes from local PEM files or from a [`SecretProvider`].
//! Precedence for the root bundle is an explicit root file, then the
//! provider's `ROOTCA` secret, then `<cert_dir>/root-cert.pem`. The client
//! identity is `<cert_dir>/cert-chain.pem` + `<cert_dir>/key.pem`, or the
//! provider's `default` secret.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Boxed future returned by [`SecretProvider`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Secret name for the workload certificate and key.
pub const WORKLOAD_SECRET: &str = "default";
/// Secret name for the root bundle.
pub const ROOT_SECRET: &str = "ROOTCA";

const CERT_CHAIN_FILE: &str = "cert-chain.pem";
const KEY_FILE: &str = "key.pem";
const ROOT_CERT_FILE: &str = "root-cert.pem";

/// PEM material returned by a [`SecretProvider`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretItem {
    /// PEM certificate chain, leaf first.
    pub certificate_chain: Vec<u8>,
    /// PEM private key.
    pub private_key: Vec<u8>,
    /// PEM root bundle.
    pub root_cert: Vec<u8>,
}

impl fmt::Debug for SecretItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretItem")
            .field("certificate_chain", &self.certificate_chain.len())
            .field("private_key", &"<redacted>")
            .field("root_cert", &self.root_cert.len())
            .finish()
    }
}

/// Source of workload certificates, e.g. a CA client exchanging a JWT for a
/// signed certificate.
pub trait SecretProvider: Send + Sync + 'static {
    /// Fetch the named secret. `token` is the workload JWT, or empty when
    /// none could be read and the provider should use ambient credentials.
    fn generate_secret<'a>(
        &'a self,
        resource_name: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Result<SecretItem>>;
}

/// How the session transport is secured.
#[derive(Clone, Debug, Default)]
pub enum Credentials {
    /// Plaintext.
    #[default]
    Insecure,
    /// Server-authenticated TLS; mutual TLS when an identity is configured.
    Tls(TlsOptions),
}

impl Credentials {
    /// Check file-based material. Called when a transport is configured so
    /// unusable files surface at startup rather than on the first dial.
    pub fn validate(&self) -> Result<()> {
        match self {
            Credentials::Insecure => Ok(()),
            Credentials::Tls(options) => options.validate(),
        }
    }
}

#[derive(Clone)]
struct SecretSource {
    provider: Arc<dyn SecretProvider>,
    jwt_path: Option<PathBuf>,
}

/// TLS settings.
#[derive(Clone, Default)]
pub struct TlsOptions {
    cert_dir: Option<PathBuf>,
    root_cert: Option<PathBuf>,
    secrets: Option<SecretSource>,
    server_name: Option<String>,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("cert_dir", &self.cert_dir)
            .field("root_cert", &self.root_cert)
            .field("secrets", &self.secrets.as_ref().map(|s| &s.jwt_path))
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Resolved PEM material for one dial.
#[derive(Clone, Default)]
pub struct TlsMaterial {
    /// Root bundle; `None` leaves the TLS stack's defaults in place.
    pub root_cert: Option<Vec<u8>>,
    /// Client certificate chain and key.
    pub identity: Option<(Vec<u8>, Vec<u8>)>,
    /// Name to verify the server certificate against.
    pub server_name: Option<String>,
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("root_cert", &self.root_cert.is_some())
            .field("identity", &self.identity.is_some())
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl TlsOptions {
    /// TLS with the TLS stack's default roots and no client identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory holding `cert-chain.pem`, `key.pem` and optionally `root-cert.pem`.
    pub fn with_cert_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cert_dir = Some(dir.into());
        self
    }

    /// Explicit root bundle file.
    pub fn with_root_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_cert = Some(path.into());
        self
    }

    /// Fetch material from `provider`, authenticating with the JWT at `jwt_path`.
    pub fn with_secret_provider(
        mut self,
        provider: Arc<dyn SecretProvider>,
        jwt_path: Option<PathBuf>,
    ) -> Self {
        self.secrets = Some(SecretSource { provider, jwt_path });
        self
    }

    /// Override the name the server certificate is verified against.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if let Some(path) = &self.root_cert {
            first_certificate(&read_file(path)?)?;
        }
        if let Some(dir) = &self.cert_dir {
            let chain = read_file(&dir.join(CERT_CHAIN_FILE))?;
            check_private_key(&read_file(&dir.join(KEY_FILE))?)?;
            check_not_expired(&chain)?;
        }
        Ok(())
    }

    /// Resolve the material for a dial. Files are re-read every time so
    /// rotated certificates are picked up on reconnect.
    pub async fn resolve(&self) -> Result<TlsMaterial> {
        let token = match &self.secrets {
            Some(source) => read_token(source.jwt_path.as_deref()).await,
            None => String::new(),
        };

        let root_cert = if let Some(path) = &self.root_cert {
            Some(read_file_async(path).await?)
        } else if let Some(source) = &self.secrets {
            let item = source.provider.generate_secret(ROOT_SECRET, &token).await?;
            Some(item.root_cert)
        } else if let Some(dir) = &self.cert_dir {
            let path = dir.join(ROOT_CERT_FILE);
            match tokio::fs::read(&path).await {
                Ok(pem) => Some(pem),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "no root cert in cert dir");
                    None
                }
            }
        } else {
            None
        };

        let identity = if let Some(dir) = &self.cert_dir {
            let chain = read_file_async(&dir.join(CERT_CHAIN_FILE)).await?;
            let key = read_file_async(&dir.join(KEY_FILE)).await?;
            Some((chain, key))
        } else if let Some(source) = &self.secrets {
            let item = source
                .provider
                .generate_secret(WORKLOAD_SECRET, &token)
                .await?;
            Some((item.certificate_chain, item.private_key))
        } else {
            None
        };

        if let Some((chain, _)) = &identity {
            check_not_expired(chain)?;
        }

        Ok(TlsMaterial {
            root_cert,
            identity,
            server_name: self.server_name.clone(),
        })
    }
}

async fn read_token(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return String::new();
    };
    match tokio::fs::read_to_string(path).await {
        Ok(token) => token.trim().to_string(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable workload token, using ambient credentials");
            String::new()
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::Credential(format!("{}: {e}", path.display())))
}

async fn read_file_async(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| Error::Credential(format!("{}: {e}", path.display())))
}

/// DER bytes of the first certificate in a PEM bundle.
fn first_certificate(pem: &[u8]) -> Result<Vec<u8>> {
    let mut reader = pem;
    let der = rustls_pemfile::certs(&mut reader)
        .next()
        .ok_or_else(|| Error::Credential("no certificate found in PEM".into()))?
        .map_err(|e| Error::Credential(format!("invalid PEM: {e}")))?;
    Ok(der.to_vec())
}

fn check_private_key(pem: &[u8]) -> Result<()> {
    let mut reader = pem;
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(Error::Credential("no private key found in PEM".into())),
        Err(e) => Err(Error::Credential(format!("invalid private key: {e}"))),
    }
}

/// Reject a leaf certificate that is outside its validity window.
fn check_not_expired(chain: &[u8]) -> Result<()> {
    let der = first_certificate(chain)?;
    let (_, cert) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| Error::Credential(format!("invalid certificate: {e}")))?;
    let validity = cert.validity();
    if !validity.is_valid() {
        return Err(Error::Credential(format!(
            "certificate not valid between {} and {}",
            validity.not_before, validity.not_after
        )));
    }
    Ok(())
}
