use std::sync::Arc;

use indexmap::IndexMap;
use prost::Message;
use tracing::{debug, warn};

use crate::cache::TypedCaches;
use crate::message::DiscoveryResponse;
use crate::proto::endpoint::ClusterLoadAssignment;
use crate::resource::Applied;

pub(super) fn apply(caches: &mut TypedCaches, response: &DiscoveryResponse) -> Applied {
    let mut endpoints = IndexMap::new();
    let mut decode_errors = Vec::new();

    for resource in &response.resources {
        match ClusterLoadAssignment::decode(resource.value.clone()) {
            Ok(assignment) => {
                endpoints.insert(assignment.cluster_name.clone(), Arc::new(assignment));
            }
            Err(e) => {
                warn!(type_url = %response.type_url, error = %e, "skipping malformed endpoint assignment");
                decode_errors.push(format!("endpoint: {e}"));
            }
        }
    }

    debug!(clusters = endpoints.len(), "applied endpoints");
    caches.endpoints = endpoints;

    Applied {
        narrowing: None,
        decode_errors,
    }
}
