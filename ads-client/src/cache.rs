//! Typed, name-keyed caches of the last applied resources.
//!
//! Each response batch replaces the named set for its kind wholesale. The
//! caches are written only by the worker and read by consumers under the
//! client's lock; accessors hand out `Arc` snapshots.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::Result;
use crate::proto::Any;
use crate::proto::cluster::Cluster;
use crate::proto::endpoint::ClusterLoadAssignment;
use crate::proto::listener::Listener;
use crate::proto::route::RouteConfiguration;
use crate::resource::{Gvk, ResourceType};

/// A generic versioned config object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigObject {
    /// The object's group/version/kind.
    pub gvk: Gvk,
    /// Namespace half of the `namespace/name` identity.
    pub namespace: String,
    /// Name half of the `namespace/name` identity.
    pub name: String,
    /// Server-assigned resource version.
    pub resource_version: String,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
    /// Creation time in seconds since the Unix epoch, if the server set one.
    pub created_at: Option<i64>,
    /// The opaque object body.
    pub body: Option<Any>,
}

/// The mesh-wide singleton config, kept as an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshConfig {
    /// Version of the response that carried it.
    pub version: String,
    /// The encoded payload.
    pub body: Any,
}

/// Namespace and name of a config object.
pub type ConfigKey = (String, String);

/// The typed caches.
#[derive(Debug, Default)]
pub struct TypedCaches {
    pub(crate) http_listeners: IndexMap<String, Arc<Listener>>,
    pub(crate) tcp_listeners: IndexMap<String, Arc<Listener>>,
    pub(crate) eds_clusters: IndexMap<String, Arc<Cluster>>,
    pub(crate) clusters: IndexMap<String, Arc<Cluster>>,
    pub(crate) routes: IndexMap<String, Arc<RouteConfiguration>>,
    pub(crate) endpoints: IndexMap<String, Arc<ClusterLoadAssignment>>,
    pub(crate) configs: HashMap<Gvk, IndexMap<ConfigKey, Arc<ConfigObject>>>,
    pub(crate) mesh: Option<Arc<MeshConfig>>,
}

/// A snapshot file: the suffix appended to the snapshot base path, and its contents.
pub(crate) type SnapshotFile = (String, Vec<u8>);

#[derive(Serialize)]
struct ListenerSnapshot<'a> {
    http: &'a IndexMap<String, Arc<Listener>>,
    tcp: &'a IndexMap<String, Arc<Listener>>,
}

#[derive(Serialize)]
struct ClusterSnapshot<'a> {
    eds: &'a IndexMap<String, Arc<Cluster>>,
    #[serde(rename = "static")]
    static_clusters: &'a IndexMap<String, Arc<Cluster>>,
}

impl TypedCaches {
    /// Snapshot files for the kind a response just updated.
    pub(crate) fn update_snapshots(&self, resource_type: &ResourceType) -> Result<Vec<SnapshotFile>> {
        let files = match resource_type {
            ResourceType::Listener => vec![file(
                "_lds.json",
                &ListenerSnapshot {
                    http: &self.http_listeners,
                    tcp: &self.tcp_listeners,
                },
            )?],
            ResourceType::Cluster => vec![file(
                "_cds.json",
                &ClusterSnapshot {
                    eds: &self.eds_clusters,
                    static_clusters: &self.clusters,
                },
            )?],
            ResourceType::Route => vec![file("_rds.json", &self.routes)?],
            ResourceType::Endpoint => vec![file("_eds.json", &self.endpoints)?],
            ResourceType::MeshConfig => vec![file("_mesh.json", &self.mesh)?],
            ResourceType::Config(gvk) => {
                let Some(objects) = self.configs.get(gvk) else {
                    return Ok(vec![]);
                };
                objects
                    .values()
                    .map(|object| {
                        file(
                            &format!(
                                "_res.{}.{}.{}.json",
                                gvk.kind, object.namespace, object.name
                            ),
                            object,
                        )
                    })
                    .collect::<Result<_>>()?
            }
        };
        Ok(files)
    }

    /// Snapshot files for the full cache set.
    pub(crate) fn full_snapshot(&self) -> Result<Vec<SnapshotFile>> {
        Ok(vec![
            file("_lds_tcp.json", &self.tcp_listeners)?,
            file("_lds_http.json", &self.http_listeners)?,
            file("_rds.json", &self.routes)?,
            file("_ecds.json", &self.eds_clusters)?,
            file("_cds.json", &self.clusters)?,
            file("_eds.json", &self.endpoints)?,
        ])
    }

    /// Returns the endpoint assignments as pretty JSON.
    pub(crate) fn endpoints_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.endpoints)?)
    }
}

fn file<T: Serialize + ?Sized>(suffix: &str, value: &T) -> Result<SnapshotFile> {
    Ok((suffix.to_string(), serde_json::to_vec_pretty(value)?))
}

/// Write snapshot files next to `base`, each named `<base><suffix>`.
pub(crate) async fn write_snapshots(base: &Path, files: Vec<SnapshotFile>) -> Result<()> {
    for (suffix, contents) in files {
        let mut path = base.as_os_str().to_os_string();
        path.push(&suffix);
        tokio::fs::write(PathBuf::from(path), contents).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::cluster::cluster;

    fn cluster(name: &str) -> Arc<Cluster> {
        Arc::new(Cluster {
            name: name.to_string(),
            cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(
                cluster::discovery_type::EDS,
            )),
            eds_cluster_config: None,
        })
    }

    #[test]
    fn test_full_snapshot_names() {
        let caches = TypedCaches::default();
        let names: Vec<String> = caches
            .full_snapshot()
            .unwrap()
            .into_iter()
            .map(|(suffix, _)| suffix)
            .collect();
        assert_eq!(
            names,
            [
                "_lds_tcp.json",
                "_lds_http.json",
                "_rds.json",
                "_ecds.json",
                "_cds.json",
                "_eds.json"
            ]
        );
    }

    #[test]
    fn test_cluster_snapshot_is_json() {
        let mut caches = TypedCaches::default();
        caches
            .eds_clusters
            .insert("outbound|80||a".to_string(), cluster("outbound|80||a"));

        let files = caches
            .update_snapshots(&ResourceType::Cluster)
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "_cds.json");

        let value: serde_json::Value = serde_json::from_slice(&files[0].1).unwrap();
        assert_eq!(value["eds"]["outbound|80||a"]["name"], "outbound|80||a");
        assert!(value["static"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_config_object_snapshot_name() {
        let gvk = Gvk::new("networking.istio.io", "v1alpha3", "Gateway");
        let mut caches = TypedCaches::default();
        let object = ConfigObject {
            gvk: gvk.clone(),
            namespace: "istio-system".to_string(),
            name: "ingress".to_string(),
            resource_version: "3".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            created_at: None,
            body: None,
        };
        caches.configs.entry(gvk.clone()).or_default().insert(
            ("istio-system".to_string(), "ingress".to_string()),
            Arc::new(object),
        );

        let files = caches
            .update_snapshots(&ResourceType::Config(gvk))
            .unwrap();
        assert_eq!(files[0].0, "_res.Gateway.istio-system.ingress.json");
    }

    #[tokio::test]
    async fn test_snapshots_are_written_next_to_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("proxy");
        let caches = TypedCaches::default();

        write_snapshots(&base, caches.full_snapshot().unwrap())
            .await
            .unwrap();

        let eds = std::fs::read(dir.path().join("proxy_eds.json")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&eds).unwrap();
        assert!(value.as_object().unwrap().is_empty());
        assert!(dir.path().join("proxy_lds_tcp.json").exists());
    }
}
