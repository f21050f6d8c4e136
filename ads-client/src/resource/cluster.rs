//! Cluster classification.

use std::sync::Arc;

use indexmap::IndexMap;
use prost::Message;
use tracing::{debug, warn};

use crate::cache::TypedCaches;
use crate::message::DiscoveryResponse;
use crate::proto::cluster::{Cluster, cluster};
use crate::resource::{Applied, Narrowing, ResourceType};

/// Returns true if the cluster's membership comes from endpoint discovery.
pub(crate) fn is_eds(c: &Cluster) -> bool {
    matches!(
        c.cluster_discovery_type,
        Some(cluster::ClusterDiscoveryType::Type(cluster::discovery_type::EDS))
    )
}

pub(super) fn apply(caches: &mut TypedCaches, response: &DiscoveryResponse) -> Applied {
    let mut eds = IndexMap::new();
    let mut clusters = IndexMap::new();
    let mut decode_errors = Vec::new();

    for resource in &response.resources {
        let c = match Cluster::decode(resource.value.clone()) {
            Ok(c) => c,
            Err(e) => {
                warn!(type_url = %response.type_url, error = %e, "skipping malformed cluster");
                decode_errors.push(format!("cluster: {e}"));
                continue;
            }
        };
        if is_eds(&c) {
            eds.insert(c.name.clone(), Arc::new(c));
        } else {
            clusters.insert(c.name.clone(), Arc::new(c));
        }
    }

    debug!(eds = eds.len(), clusters = clusters.len(), "applied clusters");
    let names = eds.keys().cloned().collect();
    caches.eds_clusters = eds;
    caches.clusters = clusters;

    Applied {
        narrowing: Some(Narrowing {
            dependent: ResourceType::Endpoint,
            names,
        }),
        decode_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ResourceAny;

    fn encoded(name: &str, discovery_type: i32) -> ResourceAny {
        let c = Cluster {
            name: name.to_string(),
            cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(discovery_type)),
            eds_cluster_config: None,
        };
        ResourceAny {
            type_url: crate::resource::CLUSTER.to_string(),
            value: c.encode_to_vec().into(),
        }
    }

    #[test]
    fn test_only_eds_clusters_are_narrowed() {
        let response = DiscoveryResponse {
            version_info: "1".to_string(),
            resources: vec![
                encoded("A", cluster::discovery_type::EDS),
                encoded("B", cluster::discovery_type::STATIC),
                encoded("C", cluster::discovery_type::EDS),
                encoded("D", cluster::discovery_type::LOGICAL_DNS),
                encoded("E", cluster::discovery_type::ORIGINAL_DST),
            ],
            type_url: crate::resource::CLUSTER.to_string(),
            nonce: "n".to_string(),
        };

        let mut caches = TypedCaches::default();
        let applied = apply(&mut caches, &response);

        assert_eq!(
            applied.narrowing.unwrap().names,
            vec!["A".to_string(), "C".to_string()]
        );
        assert_eq!(
            caches.clusters.keys().collect::<Vec<_>>(),
            vec!["B", "D", "E"]
        );
    }

    #[test]
    fn test_custom_cluster_type_is_static() {
        let c = Cluster {
            name: "custom".to_string(),
            cluster_discovery_type: Some(cluster::ClusterDiscoveryType::ClusterType(
                cluster::CustomClusterType {
                    name: "envoy.clusters.aggregate".to_string(),
                },
            )),
            eds_cluster_config: None,
        };
        assert!(!is_eds(&c));
    }
}
