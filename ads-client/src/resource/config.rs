//! Generic versioned config objects and the mesh-wide config.

use std::sync::Arc;

use indexmap::IndexMap;
use prost::Message;
use tracing::{debug, warn};

use crate::cache::{ConfigObject, MeshConfig, TypedCaches};
use crate::message::DiscoveryResponse;
use crate::proto::Any;
use crate::proto::config::Resource;
use crate::resource::{Applied, Gvk};

/// Split a `namespace/name` identity into its two halves.
fn split_name(name: &str) -> Option<(&str, &str)> {
    let (namespace, name) = name.split_once('/')?;
    if name.contains('/') {
        return None;
    }
    Some((namespace, name))
}

fn to_object(gvk: &Gvk, resource: Resource) -> Result<ConfigObject, String> {
    let metadata = resource.metadata.unwrap_or_default();
    let (namespace, name) =
        split_name(&metadata.name).ok_or_else(|| format!("invalid name {:?}", metadata.name))?;

    Ok(ConfigObject {
        gvk: gvk.clone(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        resource_version: metadata.version,
        labels: metadata.labels.into_iter().collect(),
        annotations: metadata.annotations.into_iter().collect(),
        created_at: metadata.create_time.map(|t| t.seconds),
        body: resource.body.map(|body| Any {
            type_url: body.type_url,
            value: body.value,
        }),
    })
}

pub(super) fn apply(caches: &mut TypedCaches, response: &DiscoveryResponse) -> Applied {
    let Some(gvk) = Gvk::parse(&response.type_url) else {
        return Applied::default();
    };

    let mut objects = IndexMap::new();
    let mut decode_errors = Vec::new();

    for any in &response.resources {
        let resource = match Resource::decode(any.value.clone()) {
            Ok(resource) => resource,
            Err(e) => {
                warn!(type_url = %response.type_url, error = %e, "skipping malformed config resource");
                decode_errors.push(format!("{gvk}: {e}"));
                continue;
            }
        };
        match to_object(&gvk, resource) {
            Ok(object) => {
                objects.insert(
                    (object.namespace.clone(), object.name.clone()),
                    Arc::new(object),
                );
            }
            // Not a decode failure; the object is dropped without a NACK.
            Err(e) => warn!(%gvk, error = %e, "ignoring config resource"),
        }
    }

    debug!(%gvk, objects = objects.len(), "applied config");
    caches.configs.insert(gvk, objects);
    Applied {
        narrowing: None,
        decode_errors,
    }
}

/// The first resource in the batch is the mesh config.
pub(super) fn apply_mesh(caches: &mut TypedCaches, response: &DiscoveryResponse) -> Applied {
    if let Some(first) = response.resources.first() {
        caches.mesh = Some(Arc::new(MeshConfig {
            version: response.version_info.clone(),
            body: Any {
                type_url: first.type_url.clone(),
                value: first.value.to_vec(),
            },
        }));
    }
    Applied::default()
}
