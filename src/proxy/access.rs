//! Workspace resolution and member-cluster access
//!
//! Workspaces are computed per request from Space and SpaceBinding resources;
//! nothing is cached. The member-cluster list is owned by a
//! [`MemberClusterSource`], cached behind a reader-writer lock in production
//! and fixed in tests. Home, shared and plugin-backed workspaces differ only
//! in how the target URL is resolved.

use std::sync::Arc;

use kube::api::Api;
use parking_lot::RwLock;

use crate::crd::{Route, SPACE_BINDING_MUR_LABEL};
use crate::error::HttpError;
use crate::proxy::workspace::WorkspaceContext;
use crate::signup::Signup;
use crate::store::SignupStore;

/// A registered member cluster
#[derive(Clone)]
pub struct MemberCluster {
    /// Cluster name, matched against Space target clusters
    pub name: String,
    /// API server URL
    pub api_endpoint: String,
    /// Service-account token used for impersonated requests
    pub sa_token: String,
    /// The member operator's namespace (plugin Routes live here)
    pub operator_namespace: String,
    /// Client for reading resources on the member cluster
    pub client: Option<kube::Client>,
}

/// Source of the registered member clusters
pub trait MemberClusterSource: Send + Sync {
    /// Snapshot of the registered member clusters
    fn members(&self) -> Vec<MemberCluster>;
}

/// A fixed member list, used by tests and static deployments
pub struct FixedMembers(pub Vec<MemberCluster>);

impl MemberClusterSource for FixedMembers {
    fn members(&self) -> Vec<MemberCluster> {
        self.0.clone()
    }
}

/// Member list refreshed out of band; readers get a snapshot.
#[derive(Default)]
pub struct CachedMembers {
    inner: RwLock<Vec<MemberCluster>>,
}

impl CachedMembers {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached member list
    pub fn replace(&self, members: Vec<MemberCluster>) {
        *self.inner.write() = members;
    }
}

impl MemberClusterSource for CachedMembers {
    fn members(&self) -> Vec<MemberCluster> {
        self.inner.read().clone()
    }
}

/// Whether a workspace is the user's home workspace
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkspaceKind {
    /// The user's default workspace
    Home,
    /// A workspace shared with the user
    Shared,
}

/// A workspace computed from Space and SpaceBinding resources
#[derive(Clone, Debug, PartialEq)]
pub struct Workspace {
    /// Workspace name (the Space name)
    pub name: String,
    /// Namespaces belonging to the workspace
    pub namespaces: Vec<String>,
    /// Home or shared
    pub kind: WorkspaceKind,
    /// Member cluster hosting the workspace
    pub cluster_name: String,
}

/// Everything needed to dispatch one request upstream
#[derive(Clone, Debug, PartialEq)]
pub struct NamespaceAccess {
    /// Target URL (member API server or plugin route)
    pub api_url: String,
    /// Service-account token presented upstream
    pub sa_token: String,
    /// Username set as the impersonation identity
    pub impersonate_username: String,
    /// Name of the target member cluster
    pub cluster_name: String,
}

/// Resolves an authenticated user plus a workspace context to a target
/// member cluster.
pub struct WorkspaceResolver {
    store: Arc<dyn SignupStore>,
    members: Arc<dyn MemberClusterSource>,
}

impl WorkspaceResolver {
    /// Create a resolver
    pub fn new(store: Arc<dyn SignupStore>, members: Arc<dyn MemberClusterSource>) -> Self {
        Self { store, members }
    }

    /// Compute the user's workspaces from their SpaceBindings.
    pub async fn list_workspaces(&self, signup: &Signup) -> Result<Vec<Workspace>, HttpError> {
        let selector = format!("{}={}", SPACE_BINDING_MUR_LABEL, signup.compliant_username);
        let bindings = self
            .store
            .list_space_bindings(&selector)
            .await
            .map_err(|e| HttpError::internal(e.to_string(), ""))?;

        let mut workspaces = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let space = self
                .store
                .get_space(&binding.spec.space)
                .await
                .map_err(|e| HttpError::internal(e.to_string(), ""))?;
            let Some(space) = space else { continue };

            let name = space.metadata.name.clone().unwrap_or_default();
            let kind = if name == signup.home_space {
                WorkspaceKind::Home
            } else {
                WorkspaceKind::Shared
            };
            workspaces.push(Workspace {
                kind,
                namespaces: space
                    .status
                    .as_ref()
                    .map(|s| s.provisioned_namespaces.iter().map(|n| n.name.clone()).collect())
                    .unwrap_or_default(),
                cluster_name: space.spec.target_cluster.clone(),
                name,
            });
        }
        Ok(workspaces)
    }

    /// Resolve the request's workspace context to a target cluster.
    ///
    /// Error messages are bare; the proxy wraps them with its own context.
    pub async fn resolve_access(
        &self,
        signup: &Signup,
        ctx: &WorkspaceContext,
    ) -> Result<NamespaceAccess, HttpError> {
        if !signup.status.ready {
            return Err(not_provisioned());
        }

        let cluster_name = if ctx.workspace.is_empty() {
            // implicit home workspace
            if signup.home_space.is_empty() {
                return Err(not_provisioned());
            }
            let space = self
                .store
                .get_space(&signup.home_space)
                .await
                .map_err(|e| HttpError::internal(e.to_string(), ""))?
                .ok_or_else(not_provisioned)?;
            space.spec.target_cluster.clone()
        } else {
            let workspaces = self.list_workspaces(signup).await?;
            validate_workspace_request(&ctx.workspace, &workspaces)?;
            workspaces
                .iter()
                .find(|w| w.name == ctx.workspace)
                .map(|w| w.cluster_name.clone())
                .ok_or_else(not_provisioned)?
        };

        let members = self.members.members();
        if members.is_empty() {
            return Err(not_provisioned());
        }
        let member = members
            .into_iter()
            .find(|m| m.name == cluster_name)
            .ok_or_else(not_provisioned)?;

        let api_url = if ctx.plugin.is_empty() {
            member.api_endpoint.clone()
        } else {
            self.resolve_plugin_url(&ctx.plugin, &member).await?
        };

        Ok(NamespaceAccess {
            api_url,
            sa_token: member.sa_token,
            impersonate_username: signup.compliant_username.clone(),
            cluster_name: member.name,
        })
    }

    /// Resolve a plugin to the URL of its Route on the member cluster.
    async fn resolve_plugin_url(
        &self,
        plugin_name: &str,
        member: &MemberCluster,
    ) -> Result<String, HttpError> {
        let plugin = self
            .store
            .get_proxy_plugin(plugin_name)
            .await
            .map_err(|e| HttpError::internal(e.to_string(), ""))?
            .ok_or_else(|| {
                HttpError::internal(format!("proxy plugin '{}' not found", plugin_name), "")
            })?;

        let target = plugin
            .spec
            .open_shift_route_target_endpoint
            .as_ref()
            .ok_or_else(|| {
                HttpError::internal(
                    format!("proxy plugin '{}' has no route target", plugin_name),
                    "",
                )
            })?;

        let client = member.client.clone().ok_or_else(|| {
            HttpError::internal(
                format!("no client available for member cluster '{}'", member.name),
                "",
            )
        })?;

        let api: Api<Route> = Api::namespaced(client, &target.namespace);
        let route = api
            .get_opt(&target.name)
            .await
            .map_err(|e| HttpError::internal(e.to_string(), ""))?
            .ok_or_else(|| {
                HttpError::internal(
                    format!("route '{}/{}' not found", target.namespace, target.name),
                    "",
                )
            })?;

        route.base_url().ok_or_else(|| {
            HttpError::internal(
                format!("route '{}/{}' has no admitted ingress", target.namespace, target.name),
                "",
            )
        })
    }
}

/// Check that the requested workspace belongs to the user's workspace set.
/// An empty request selects the home workspace.
pub fn validate_workspace_request(
    requested: &str,
    workspaces: &[Workspace],
) -> Result<(), HttpError> {
    let allowed = if requested.is_empty() {
        workspaces.iter().any(|w| w.kind == WorkspaceKind::Home)
    } else {
        workspaces.iter().any(|w| w.name == requested)
    };
    if allowed {
        Ok(())
    } else {
        Err(HttpError::internal(
            format!("access to workspace '{}' is forbidden", requested),
            "",
        ))
    }
}

fn not_provisioned() -> HttpError {
    HttpError::internal("user is not provisioned (yet)", "")
}
