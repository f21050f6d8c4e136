//! Listener classification.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use prost::Message;
use tracing::{debug, warn};

use crate::cache::TypedCaches;
use crate::message::DiscoveryResponse;
use crate::proto::listener::{Filter, FilterChain, Listener, TcpProxy, tcp_proxy};
use crate::resource::{Applied, Narrowing, ResourceType};

const TCP_PROXY_FILTERS: &[&str] = &["envoy.tcp_proxy", "envoy.filters.network.tcp_proxy"];

const HTTP_CONNECTION_MANAGER_FILTERS: &[&str] = &[
    "envoy.http_connection_manager",
    "envoy.filters.network.http_connection_manager",
];

/// Filters that precede the classifying filter in a chain.
const METADATA_EXCHANGE_FILTERS: &[&str] = &[
    "mixer",
    "istio.metadata_exchange",
    "envoy.filters.network.metadata_exchange",
];

/// Recognized, but never classified.
const IGNORED_FILTERS: &[&str] = &[
    "envoy.mongo_proxy",
    "envoy.filters.network.mongo_proxy",
    "envoy.redis_proxy",
    "envoy.filters.network.redis_proxy",
    "envoy.filters.network.mysql_proxy",
];

const PASSTHROUGH_FILTER_CHAIN: &str = "PassthroughFilterChain";

/// Listeners on this port route by the synthetic `http_proxy` route config.
pub(crate) const HTTP_PROXY_PORT: u32 = 15002;
const HTTP_PROXY_ROUTE: &str = "http_proxy";

/// How a listener was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ListenerKind {
    /// TCP proxy, with the target cluster when the filter config names one.
    Tcp { cluster: Option<String> },
    /// HTTP connection manager, with the route config name to watch.
    Http { route: String },
}

/// Classify a listener by the first filter of its last filter chain.
///
/// Returns `None` for API listeners, ignored filter kinds, and listeners
/// whose shape does not allow classification.
pub(crate) fn classify(listener: &Listener) -> Option<ListenerKind> {
    if listener.api_listener.is_some() {
        return None;
    }

    let chain = last_chain(&listener.filter_chains)?;
    let filter = classifying_filter(chain)?;
    let name = filter.name.as_str();

    if TCP_PROXY_FILTERS.contains(&name) {
        return Some(ListenerKind::Tcp {
            cluster: tcp_proxy_cluster(filter),
        });
    }

    if HTTP_CONNECTION_MANAGER_FILTERS.contains(&name) {
        let port = listener.port()?;
        let route = if port == HTTP_PROXY_PORT {
            HTTP_PROXY_ROUTE.to_string()
        } else {
            port.to_string()
        };
        return Some(ListenerKind::Http { route });
    }

    if !IGNORED_FILTERS.contains(&name) {
        debug!(listener = %listener.name, filter = name, "unrecognized listener filter");
    }
    None
}

fn last_chain(chains: &[FilterChain]) -> Option<&FilterChain> {
    let (last, rest) = chains.split_last()?;
    if last.name == PASSTHROUGH_FILTER_CHAIN {
        rest.last()
    } else {
        Some(last)
    }
}

fn classifying_filter(chain: &FilterChain) -> Option<&Filter> {
    let mut filters = chain.filters.iter();
    let first = filters.next()?;
    if METADATA_EXCHANGE_FILTERS.contains(&first.name.as_str()) {
        filters.next()
    } else {
        Some(first)
    }
}

fn tcp_proxy_cluster(filter: &Filter) -> Option<String> {
    let config = filter.typed_config.as_ref()?;
    let proxy = TcpProxy::decode(config.value.as_slice()).ok()?;
    match proxy.cluster_specifier? {
        tcp_proxy::ClusterSpecifier::Cluster(cluster) => Some(cluster),
    }
}

pub(super) fn apply(caches: &mut TypedCaches, response: &DiscoveryResponse) -> Applied {
    let mut http = IndexMap::new();
    let mut tcp = IndexMap::new();
    let mut routes = IndexSet::new();
    let mut decode_errors = Vec::new();

    for resource in &response.resources {
        let listener = match Listener::decode(resource.value.clone()) {
            Ok(listener) => listener,
            Err(e) => {
                warn!(type_url = %response.type_url, error = %e, "skipping malformed listener");
                decode_errors.push(format!("listener: {e}"));
                continue;
            }
        };

        match classify(&listener) {
            Some(ListenerKind::Tcp { cluster }) => {
                debug!(listener = %listener.name, cluster = ?cluster, "tcp proxy listener");
                tcp.insert(listener.name.clone(), Arc::new(listener));
            }
            Some(ListenerKind::Http { route }) => {
                routes.insert(route);
                http.insert(listener.name.clone(), Arc::new(listener));
            }
            None => {}
        }
    }

    debug!(
        http = http.len(),
        tcp = tcp.len(),
        routes = routes.len(),
        "applied listeners"
    );
    caches.http_listeners = http;
    caches.tcp_listeners = tcp;

    Applied {
        narrowing: Some(Narrowing {
            dependent: ResourceType::Route,
            names: routes.into_iter().collect(),
        }),
        decode_errors,
    }
}
