use std::sync::Arc;

use indexmap::IndexMap;
use prost::Message;
use tracing::{debug, warn};

use crate::cache::TypedCaches;
use crate::message::DiscoveryResponse;
use crate::proto::route::RouteConfiguration;
use crate::resource::Applied;

pub(super) fn apply(caches: &mut TypedCaches, response: &DiscoveryResponse) -> Applied {
    let mut routes = IndexMap::new();
    let mut decode_errors = Vec::new();
    let mut virtual_hosts = 0;

    for resource in &response.resources {
        match RouteConfiguration::decode(resource.value.clone()) {
            Ok(route) => {
                virtual_hosts += route.virtual_hosts.len();
                routes.insert(route.name.clone(), Arc::new(route));
            }
            Err(e) => {
                warn!(type_url = %response.type_url, error = %e, "skipping malformed route");
                decode_errors.push(format!("route: {e}"));
            }
        }
    }

    debug!(routes = routes.len(), virtual_hosts, "applied routes");
    caches.routes = routes;

    Applied {
        narrowing: None,
        decode_errors,
    }
}
