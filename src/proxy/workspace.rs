//! Workspace URL parsing
//!
//! A proxied path may carry an optional `/plugins/<plugin>` segment followed
//! by an optional `/workspaces/<workspace>` segment; the remainder is the
//! path forwarded upstream. Only the first `/workspaces/` occurrence is
//! consumed; `workspace` (singular) is ordinary path material.

use crate::error::HttpError;

/// Path prefix selecting a proxy plugin
const PLUGINS_PREFIX: &str = "/plugins/";

/// Path prefix selecting an explicit workspace
const WORKSPACES_PREFIX: &str = "/workspaces/";

/// The parsed workspace context of a request path
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkspaceContext {
    /// Plugin name, or empty
    pub plugin: String,
    /// Workspace name, or empty for the home workspace
    pub workspace: String,
    /// The remaining path forwarded upstream
    pub path: String,
}

/// Parse the workspace context out of a request path.
pub fn get_workspace_context(path: &str) -> Result<WorkspaceContext, HttpError> {
    if let Some(rest) = path.strip_prefix(PLUGINS_PREFIX) {
        if rest.is_empty() {
            return Err(HttpError::bad_request(
                format!("path \"{}\" not a proxied route request", path),
                "",
            ));
        }

        let (plugin, remainder) = match rest.split_once('/') {
            Some((plugin, tail)) => (plugin.to_string(), format!("/{}", tail)),
            None => (rest.to_string(), String::new()),
        };

        if let Some(after) = remainder.strip_prefix(WORKSPACES_PREFIX) {
            if after.is_empty() {
                return Err(too_few_segments(
                    WORKSPACES_PREFIX,
                    "/workspaces/<workspace_name>/<optional path>",
                ));
            }
            let (workspace, tail) = match after.split_once('/') {
                Some((workspace, tail)) => (workspace.to_string(), format!("/{}", tail)),
                None => (after.to_string(), String::new()),
            };
            return Ok(WorkspaceContext {
                plugin,
                workspace,
                path: tail,
            });
        }

        return Ok(WorkspaceContext {
            plugin,
            workspace: String::new(),
            path: remainder,
        });
    }

    if let Some(after) = path.strip_prefix(WORKSPACES_PREFIX) {
        let (workspace, tail) = match after.split_once('/') {
            Some((workspace, tail)) if !workspace.is_empty() => {
                (workspace.to_string(), format!("/{}", tail))
            }
            _ => {
                return Err(too_few_segments(
                    path,
                    "/workspaces/<workspace_name>/api/...",
                ));
            }
        };
        if tail.is_empty() {
            return Err(too_few_segments(path, "/workspaces/<workspace_name>/api/..."));
        }
        return Ok(WorkspaceContext {
            plugin: String::new(),
            workspace,
            path: tail,
        });
    }

    Ok(WorkspaceContext {
        plugin: String::new(),
        workspace: String::new(),
        path: path.to_string(),
    })
}

fn too_few_segments(path: &str, expected: &str) -> HttpError {
    HttpError::bad_request(
        format!(
            "workspace request path has too few segments '{}'; expected path format: {}",
            path, expected
        ),
        "",
    )
}

/// Join a base path and a request path with exactly one slash.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}
