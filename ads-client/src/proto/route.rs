//! `envoy.config.route.v3` messages.

use serde::Serialize;

/// `envoy.config.route.v3.RouteConfiguration`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct RouteConfiguration {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub virtual_hosts: Vec<VirtualHost>,
}

/// `envoy.config.route.v3.VirtualHost`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct VirtualHost {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, repeated, tag = "2")]
    pub domains: Vec<String>,
    #[prost(message, repeated, tag = "3")]
    pub routes: Vec<Route>,
}

/// `envoy.config.route.v3.Route`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Route {
    #[prost(message, optional, tag = "1")]
    pub r#match: Option<RouteMatch>,
    #[prost(oneof = "route::Action", tags = "2")]
    pub action: Option<route::Action>,
    #[prost(string, tag = "14")]
    pub name: String,
}

impl Route {
    /// Returns the target cluster for a single-cluster route action.
    pub fn cluster(&self) -> Option<&str> {
        match self.action.as_ref()? {
            route::Action::Route(action) => match action.cluster_specifier.as_ref()? {
                route_action::ClusterSpecifier::Cluster(cluster) => Some(cluster),
                route_action::ClusterSpecifier::ClusterHeader(_) => None,
            },
        }
    }
}

/// Nested types for [`Route`].
pub mod route {
    use serde::Serialize;

    /// `envoy.config.route.v3.Route.action`.
    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize)]
    pub enum Action {
        #[prost(message, tag = "2")]
        Route(super::RouteAction),
    }
}

/// `envoy.config.route.v3.RouteMatch`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct RouteMatch {
    #[prost(oneof = "route_match::PathSpecifier", tags = "1, 2")]
    pub path_specifier: Option<route_match::PathSpecifier>,
}

/// Nested types for [`RouteMatch`].
pub mod route_match {
    use serde::Serialize;

    /// `envoy.config.route.v3.RouteMatch.path_specifier`.
    #[derive(Clone, PartialEq, Eq, ::prost::Oneof, Serialize)]
    pub enum PathSpecifier {
        #[prost(string, tag = "1")]
        Prefix(String),
        #[prost(string, tag = "2")]
        Path(String),
    }
}

/// `envoy.config.route.v3.RouteAction`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct RouteAction {
    #[prost(oneof = "route_action::ClusterSpecifier", tags = "1, 2")]
    pub cluster_specifier: Option<route_action::ClusterSpecifier>,
}

/// Nested types for [`RouteAction`].
pub mod route_action {
    use serde::Serialize;

    /// `envoy.config.route.v3.RouteAction.cluster_specifier`.
    #[derive(Clone, PartialEq, Eq, ::prost::Oneof, Serialize)]
    pub enum ClusterSpecifier {
        #[prost(string, tag = "1")]
        Cluster(String),
        #[prost(string, tag = "2")]
        ClusterHeader(String),
    }
}
