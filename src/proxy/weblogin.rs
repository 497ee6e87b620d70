//! Web-login passthrough
//!
//! `/.well-known/oauth-authorization-server` and everything under `/auth/` is
//! forwarded to the identity provider. The interactive openid-connect auth
//! endpoint is answered with a redirect so the browser talks to the provider
//! directly; everything else is transparently proxied, redirects preserved.

use axum::body::Body;
use axum::http::header::{HeaderName, LOCATION};
use axum::http::{Request, Response, StatusCode};
use futures::TryStreamExt;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::HttpError;

/// The well-known path answered with the provider's openid configuration
pub const WELL_KNOWN_PATH: &str = "/.well-known/oauth-authorization-server";

/// Whether this request belongs to the web-login passthrough
pub fn is_weblogin_path(path: &str) -> bool {
    path.starts_with(WELL_KNOWN_PATH) || path.starts_with("/auth/")
}

/// The provider URL a passthrough request maps to
pub fn target_url(auth: &AuthConfig, path: &str, query: Option<&str>) -> String {
    let base = auth.sso_base_url.trim_end_matches('/');
    let mut url = if path.starts_with(WELL_KNOWN_PATH) {
        format!(
            "{}/auth/realms/{}/.well-known/openid-configuration",
            base, auth.sso_realm
        )
    } else {
        format!("{}{}", base, path)
    };
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Whether the path is the interactive openid-connect auth endpoint
pub fn is_interactive_auth_path(auth: &AuthConfig, path: &str) -> bool {
    path == format!("/auth/realms/{}/protocol/openid-connect/auth", auth.sso_realm)
}

/// Handle a web-login request.
pub async fn handle(
    auth: &AuthConfig,
    client: &reqwest::Client,
    request: Request<Body>,
) -> Response<Body> {
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let target = target_url(auth, &path, query.as_deref());

    if is_interactive_auth_path(auth, &path) {
        debug!(target = %target, "redirecting interactive login to the identity provider");
        return Response::builder()
            .status(StatusCode::SEE_OTHER)
            .header(LOCATION, target)
            .body(Body::empty())
            .unwrap_or_default();
    }

    debug!(target = %target, "forwarding web-login request");
    let upstream = match client
        .request(request.method().clone(), &target)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            return HttpError::bad_gateway(
                "unable to forward the request to the identity provider",
                e.to_string(),
            )
            .plain_response();
        }
    };

    let mut builder = Response::builder().status(upstream.status());
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            if is_forwardable_header(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }
    builder
        .body(Body::from_stream(
            upstream.bytes_stream().map_err(std::io::Error::other),
        ))
        .unwrap_or_default()
}

fn is_forwardable_header(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "connection" | "transfer-encoding" | "content-length" | "keep-alive"
    )
}
