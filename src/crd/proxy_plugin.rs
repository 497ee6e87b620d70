//! ProxyPlugin CRD and the OpenShift Route it points at
//!
//! A ProxyPlugin maps a `/plugins/<name>/...` request onto an OpenShift Route
//! in a member cluster's operator namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ProxyPlugin names a Route that plugin-scoped proxy traffic is sent to.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubesaw.dev",
    version = "v1alpha1",
    kind = "ProxyPlugin",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ProxyPluginSpec {
    /// The Route the plugin traffic targets, looked up on the member cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_shift_route_target_endpoint: Option<RouteTarget>,
}

/// Namespace/name reference to a Route on a member cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTarget {
    /// Namespace of the Route
    pub namespace: String,
    /// Name of the Route
    pub name: String,
}

/// Minimal OpenShift Route resource, enough to resolve the ingress host and
/// scheme of a plugin backend.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    namespaced,
    status = "RouteStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// TLS termination settings; presence selects the https scheme
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,
}

/// Route TLS settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    /// Termination type, e.g. "edge"
    pub termination: String,
}

/// Route status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    /// Admitted ingress points
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<RouteIngress>,
}

/// One admitted ingress point of a Route
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteIngress {
    /// Hostname the route is exposed on
    pub host: String,
}

impl Route {
    /// Base URL of the route: scheme from the TLS settings, host from the
    /// first admitted ingress.
    pub fn base_url(&self) -> Option<String> {
        let host = self
            .status
            .as_ref()?
            .ingress
            .first()
            .map(|i| i.host.clone())?;
        let scheme = if self.spec.tls.is_some() { "https" } else { "http" };
        Some(format!("{}://{}", scheme, host))
    }
}
