//! Resource type identifiers and the decode+classify registry.
//!
//! Every response is routed by its declared type URL to exactly one
//! [`ApplyFn`]. Envoy kinds are looked up in a static table; any other
//! three-segment `group/version/kind` URL is treated as a generic config
//! type.

use std::fmt;

use crate::cache::TypedCaches;
use crate::message::DiscoveryResponse;

mod cluster;
mod config;
mod endpoint;
mod listener;
mod route;

/// Type URL for listeners.
pub const LISTENER: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
/// Type URL for clusters.
pub const CLUSTER: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
/// Type URL for route configurations.
pub const ROUTE: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
/// Type URL for endpoint assignments.
pub const ENDPOINT: &str = "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
/// Type URL for the mesh-wide singleton config.
pub const MESH_CONFIG: &str = "mesh.istio.io/v1alpha1/MeshConfig";

/// Legacy (`envoy.api.v2`) spellings, accepted as equivalent to the v3 URLs.
pub mod v2 {
    /// Type URL for listeners.
    pub const LISTENER: &str = "type.googleapis.com/envoy.api.v2.Listener";
    /// Type URL for clusters.
    pub const CLUSTER: &str = "type.googleapis.com/envoy.api.v2.Cluster";
    /// Type URL for route configurations.
    pub const ROUTE: &str = "type.googleapis.com/envoy.api.v2.RouteConfiguration";
    /// Type URL for endpoint assignments.
    pub const ENDPOINT: &str = "type.googleapis.com/envoy.api.v2.ClusterLoadAssignment";
}

/// Group/version/kind of a generic config type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct Gvk {
    /// API group, e.g. `networking.istio.io`.
    pub group: String,
    /// API version, e.g. `v1alpha3`.
    pub version: String,
    /// Kind, e.g. `VirtualService`.
    pub kind: String,
}

impl Gvk {
    /// Create a new group/version/kind.
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Parse a `group/version/kind` type URL.
    ///
    /// Returns `None` unless the URL has exactly three non-empty segments.
    pub fn parse(type_url: &str) -> Option<Self> {
        let mut parts = type_url.split('/');
        let (group, version, kind) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || group.is_empty() || version.is_empty() || kind.is_empty() {
            return None;
        }
        Some(Self::new(group, version, kind))
    }

    /// Returns the type URL for this group/version/kind.
    pub fn type_url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.version, self.kind)
    }
}

/// The semantic kind of a response, also used as the update notification tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Listeners (`lds`).
    Listener,
    /// Clusters (`cds`).
    Cluster,
    /// Route configurations (`rds`).
    Route,
    /// Endpoint assignments (`eds`).
    Endpoint,
    /// The mesh-wide singleton config (`mesh`).
    MeshConfig,
    /// A generic versioned config type.
    Config(Gvk),
}

impl ResourceType {
    /// Resolve a type URL, accepting both historical Envoy spellings.
    pub fn from_type_url(type_url: &str) -> Option<Self> {
        if let Some(registration) = registration(type_url) {
            return Some(registration.resource_type.clone());
        }
        Gvk::parse(type_url).map(ResourceType::Config)
    }

    /// Returns the canonical (v3) type URL.
    pub fn type_url(&self) -> String {
        match self {
            ResourceType::Listener => LISTENER.to_string(),
            ResourceType::Cluster => CLUSTER.to_string(),
            ResourceType::Route => ROUTE.to_string(),
            ResourceType::Endpoint => ENDPOINT.to_string(),
            ResourceType::MeshConfig => MESH_CONFIG.to_string(),
            ResourceType::Config(gvk) => gvk.type_url(),
        }
    }

    /// Returns the legacy spelling for Envoy kinds.
    fn v2_type_url(&self) -> Option<&'static str> {
        match self {
            ResourceType::Listener => Some(v2::LISTENER),
            ResourceType::Cluster => Some(v2::CLUSTER),
            ResourceType::Route => Some(v2::ROUTE),
            ResourceType::Endpoint => Some(v2::ENDPOINT),
            ResourceType::MeshConfig | ResourceType::Config(_) => None,
        }
    }

    /// Returns the type URL spelled the way `like` is spelled.
    ///
    /// A narrowed follow-up triggered by a v2 response must be a v2 request.
    pub(crate) fn type_url_like(&self, like: &str) -> String {
        match self.v2_type_url() {
            Some(v2) if like.contains(".api.v2.") => v2.to_string(),
            _ => self.type_url(),
        }
    }

    /// Named-subset types must carry an explicit name list in every request.
    pub fn is_named_subset(&self) -> bool {
        matches!(self, ResourceType::Route | ResourceType::Endpoint)
    }

    /// The type whose request names are derived from this type's content.
    pub fn dependent(&self) -> Option<ResourceType> {
        match self {
            ResourceType::Listener => Some(ResourceType::Route),
            ResourceType::Cluster => Some(ResourceType::Endpoint),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Listener => f.write_str("lds"),
            ResourceType::Cluster => f.write_str("cds"),
            ResourceType::Route => f.write_str("rds"),
            ResourceType::Endpoint => f.write_str("eds"),
            ResourceType::MeshConfig => f.write_str("mesh"),
            ResourceType::Config(gvk) => fmt::Display::fmt(gvk, f),
        }
    }
}

/// Returns true if both URLs name the same resource type.
pub fn equivalent(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (ResourceType::from_type_url(a), ResourceType::from_type_url(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// A dependent type's new name set, computed from a controlling response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Narrowing {
    pub(crate) dependent: ResourceType,
    pub(crate) names: Vec<String>,
}

/// Outcome of applying one non-empty response batch to the caches.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub(crate) narrowing: Option<Narrowing>,
    /// One entry per resource skipped because it failed to decode.
    pub(crate) decode_errors: Vec<String>,
}

/// Decodes a batch and replaces the matching cache contents.
pub(crate) type ApplyFn = fn(&mut TypedCaches, &DiscoveryResponse) -> Applied;

struct Registration {
    type_urls: &'static [&'static str],
    resource_type: ResourceType,
    apply: ApplyFn,
}

static REGISTRY: [Registration; 5] = [
    Registration {
        type_urls: &[LISTENER, v2::LISTENER],
        resource_type: ResourceType::Listener,
        apply: listener::apply,
    },
    Registration {
        type_urls: &[CLUSTER, v2::CLUSTER],
        resource_type: ResourceType::Cluster,
        apply: cluster::apply,
    },
    Registration {
        type_urls: &[ROUTE, v2::ROUTE],
        resource_type: ResourceType::Route,
        apply: route::apply,
    },
    Registration {
        type_urls: &[ENDPOINT, v2::ENDPOINT],
        resource_type: ResourceType::Endpoint,
        apply: endpoint::apply,
    },
    Registration {
        type_urls: &[MESH_CONFIG],
        resource_type: ResourceType::MeshConfig,
        apply: config::apply_mesh,
    },
];

fn registration(type_url: &str) -> Option<&'static Registration> {
    REGISTRY
        .iter()
        .find(|r| r.type_urls.iter().any(|url| *url == type_url))
}

/// Find the resource type and apply function for a response's type URL.
pub(crate) fn lookup(type_url: &str) -> Option<(ResourceType, ApplyFn)> {
    if let Some(registration) = registration(type_url) {
        return Some((registration.resource_type.clone(), registration.apply));
    }
    Gvk::parse(type_url).map(|gvk| (ResourceType::Config(gvk), config::apply as ApplyFn))
}
