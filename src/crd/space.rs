//! Space and SpaceBinding CRDs
//!
//! A Space is a named collection of namespaces provisioned on one member
//! cluster; a SpaceBinding grants a user a role within a Space. Workspaces
//! are computed from these two resources per request and never stored.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Space describes a provisioned workspace on a member cluster.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubesaw.dev",
    version = "v1alpha1",
    kind = "Space",
    namespaced,
    status = "SpaceStatus",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.targetCluster"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSpec {
    /// Name of the member cluster hosting the space's namespaces
    pub target_cluster: String,
}

/// Space status maintained by the host operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpaceStatus {
    /// Namespaces provisioned for this space
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provisioned_namespaces: Vec<SpaceNamespace>,
}

/// A namespace belonging to a space
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpaceNamespace {
    /// Namespace name
    pub name: String,
}

/// SpaceBinding grants a user a role within a Space. Listed by the
/// master-user-record label.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubesaw.dev",
    version = "v1alpha1",
    kind = "SpaceBinding",
    namespaced,
    printcolumn = r#"{"name":"Space","type":"string","jsonPath":".spec.space"}"#,
    printcolumn = r#"{"name":"MUR","type":"string","jsonPath":".spec.masterUserRecord"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpaceBindingSpec {
    /// The user the binding belongs to (compliant username)
    pub master_user_record: String,

    /// The bound space
    pub space: String,

    /// Granted role, e.g. "admin"
    pub space_role: String,
}
