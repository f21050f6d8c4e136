//! Opens many ADS sessions against one discovery server and logs what each
//! of them receives.
//!
//! ```text
//! RUST_LOG=info ads-load --clients 500 --target istiod.istio-system:15010
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use ads_client::{
    AdsClient, ClientConfig, ConnectionState, Credentials, Error, NodeIdentity, ProstCodec,
    ResourceType, TlsOptions, TokioRuntime, TonicTransportBuilder, WatchSet,
};
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const INITIAL_SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const UPDATE_WAIT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(about = "Runs many ADS clients against one discovery server")]
struct Args {
    /// Number of concurrent clients.
    #[arg(long, default_value_t = 100)]
    clients: usize,

    /// Discovery server address.
    #[arg(long, default_value = "localhost:15010")]
    target: String,

    /// Directory holding cert-chain.pem, key.pem and root-cert.pem.
    /// Plaintext when unset.
    #[arg(long)]
    cert_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    trace_init();
    let args = Args::parse();

    let credentials = match &args.cert_dir {
        Some(dir) => Credentials::Tls(TlsOptions::new().with_cert_dir(dir)),
        None => Credentials::Insecure,
    };
    let transport = TonicTransportBuilder::new(credentials)?;

    info!(clients = args.clients, target = %args.target, "starting clients");
    let mut tasks = JoinSet::new();
    for n in 0..args.clients {
        let node = NodeIdentity::default()
            .with_ip(synthetic_ip(n))
            .with_workload(format!("load-{n}"));
        let config = ClientConfig::new(node, args.target.clone()).with_watch(WatchSet::envoy());
        let client = AdsClient::builder(config, transport.clone(), ProstCodec, TokioRuntime).start();
        tasks.spawn(watch_client(client));
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "client task failed");
        }
    }
    Ok(())
}

fn trace_init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(sub);
}

/// `10.10.x.y`, unique for the first 65536 clients.
fn synthetic_ip(n: usize) -> IpAddr {
    let [.., hi, lo] = (n as u32).to_be_bytes();
    IpAddr::V4(Ipv4Addr::new(10, 10, hi, lo))
}

async fn watch_client(client: AdsClient) {
    let node = client.node_id().to_string();
    let started = Instant::now();
    match client.wait(INITIAL_SYNC_TIMEOUT, &[ResourceType::Route]).await {
        Ok(_) => info!(
            %node,
            elapsed = ?started.elapsed(),
            initial_load = ?client.initial_load(),
            "first sync"
        ),
        Err(e) => warn!(%node, error = %e, "no routes received"),
    }

    loop {
        match client.wait(UPDATE_WAIT, &[]).await {
            Ok(updates) => info!(%node, ?updates, "update"),
            Err(Error::Timeout(_)) => {}
            Err(Error::Closed) if *client.state().borrow() == ConnectionState::Closed => break,
            // Session ended; the client reconnects on its own.
            Err(Error::Closed) => {}
            Err(e) => {
                warn!(%node, error = %e, "wait failed");
                break;
            }
        }
    }
    info!(%node, "client closed");
}
