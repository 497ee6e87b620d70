//! The authenticating, workspace-aware reverse proxy
//!
//! Every non-health request runs the same pipeline: web-login passthrough,
//! CORS preflight, bearer-token extraction (plain or WebSocket), claim
//! validation, ban check, workspace URL parsing, target-cluster resolution,
//! header sanitization and streaming upstream dispatch under the member
//! cluster's service-account identity with user impersonation.
//!
//! # Security
//!
//! **Impersonation headers from clients are always stripped** before the
//! proxy adds its own, so the member API server's RBAC and audit logs always
//! see the real user.

pub mod access;
pub mod cors;
pub mod metrics;
pub mod token;
pub mod transport;
pub mod weblogin;
pub mod workspace;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{HeaderName, AUTHORIZATION, CONNECTION, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::TryStreamExt;
use hyper_util::rt::TokioIo;
use tracing::{debug, error, info};

use crate::auth::TokenParser;
use crate::config::Config;
use crate::error::HttpError;
use crate::signup::SignupService;

use access::{NamespaceAccess, WorkspaceResolver};
use transport::UpstreamClients;
use workspace::{single_joining_slash, WorkspaceContext};

/// Header carrying the impersonated username upstream
const IMPERSONATE_USER: &str = "impersonate-user";

/// Prefix shared by every impersonation header
const IMPERSONATE_PREFIX: &str = "impersonate-";

/// Shared state of the proxy handlers
#[derive(Clone)]
pub struct ProxyState {
    /// Service configuration
    pub config: Arc<Config>,
    /// Bearer-token parser
    pub token_parser: Arc<TokenParser>,
    /// Signup service (ban check, signup lookup)
    pub signup_service: Arc<SignupService>,
    /// Workspace resolver
    pub resolver: Arc<WorkspaceResolver>,
    /// Upstream client set
    pub clients: Arc<UpstreamClients>,
    /// Client for the web-login passthrough; does not follow redirects
    pub weblogin_client: reqwest::Client,
}

impl ProxyState {
    /// Assemble the proxy state
    pub fn new(
        config: Arc<Config>,
        token_parser: Arc<TokenParser>,
        signup_service: Arc<SignupService>,
        resolver: Arc<WorkspaceResolver>,
    ) -> Self {
        Self {
            config,
            token_parser,
            signup_service,
            resolver,
            clients: Arc::new(UpstreamClients::new()),
            weblogin_client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_default(),
        }
    }
}

/// Build the proxy router: the health endpoint plus the catch-all pipeline
pub fn proxy_router(state: ProxyState) -> Router {
    Router::new()
        .route("/proxyhealth", get(health))
        .fallback(proxy_handler)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    ([(CONTENT_TYPE, "application/json")], r#"{"alive": true}"#)
}

async fn proxy_handler(State(state): State<ProxyState>, request: Request<Body>) -> Response<Body> {
    let path = request.uri().path().to_string();
    let response = match proxy_pipeline(&state, request).await {
        Ok(response) => response,
        Err(e) => {
            error!(path = %path, error = %e, "proxy request rejected");
            e.plain_response()
        }
    };
    metrics::record_request(response.status(), &path);
    response
}

async fn proxy_pipeline(
    state: &ProxyState,
    request: Request<Body>,
) -> Result<Response<Body>, HttpError> {
    let path = request.uri().path().to_string();

    if weblogin::is_weblogin_path(&path) {
        return Ok(weblogin::handle(&state.config.auth, &state.weblogin_client, request).await);
    }

    // preflights are answered locally, never forwarded
    if request.method() == Method::OPTIONS {
        return Ok(cors::handle_preflight(request.headers()));
    }

    let user_token = token::extract_user_token(request.headers())
        .map_err(|e| HttpError::unauthorized("invalid bearer token", e.text()))?;

    let claims = state
        .token_parser
        .parse(&user_token)
        .await
        .map_err(|e| HttpError::unauthorized("invalid bearer token", e.text()))?;

    match state.signup_service.is_email_banned(&claims.email).await {
        Ok(false) => {}
        Ok(true) => {
            return Err(HttpError::forbidden(
                "user access is forbidden",
                "user access is forbidden",
            ));
        }
        Err(e) => {
            error!(error = %e, "unable to determine whether the user is banned");
            return Err(HttpError::internal(
                "user access could not be verified",
                "could not define user access",
            ));
        }
    }

    let ctx = workspace::get_workspace_context(&path)
        .map_err(|e| HttpError::bad_request("unable to get workspace context", e.text()))?;

    let signup = state
        .signup_service
        .get_signup(&claims.username, false)
        .await
        .map_err(|e| HttpError::internal("unable to retrieve user workspaces", e.text()))?
        .ok_or_else(|| {
            HttpError::internal("unable to get target cluster", "user is not provisioned (yet)")
        })?;

    let target = state
        .resolver
        .resolve_access(&signup, &ctx)
        .await
        .map_err(|e| HttpError::internal("unable to get target cluster", e.text()))?;

    dispatch(state, request, &ctx, &target).await
}

/// Forward the request upstream, streaming the response back without
/// buffering. Protocol upgrades are tunneled with a hijacked connection.
async fn dispatch(
    state: &ProxyState,
    mut request: Request<Body>,
    ctx: &WorkspaceContext,
    target: &NamespaceAccess,
) -> Result<Response<Body>, HttpError> {
    let mut url = single_joining_slash(
        target.api_url.trim_end_matches('/'),
        if ctx.path.is_empty() { "/" } else { &ctx.path },
    );
    if let Some(query) = request.uri().query() {
        url.push('?');
        url.push_str(query);
    }

    let is_upgrade = token::is_upgrade_request(request.headers());
    let is_websocket = token::is_websocket_upgrade(request.headers());
    let upstream_transport = transport::select_transport(state.config.environment, request.headers());

    let mut headers = request.headers().clone();
    sanitize_impersonation_headers(&mut headers);
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", target.sa_token))
            .map_err(|_| HttpError::internal("invalid service-account token", ""))?,
    );
    headers.insert(
        HeaderName::from_static(IMPERSONATE_USER),
        HeaderValue::from_str(&target.impersonate_username)
            .map_err(|_| HttpError::internal("invalid impersonation username", ""))?,
    );
    if is_websocket {
        token::rewrite_websocket_protocol(&mut headers, &target.sa_token);
    }
    headers.remove(HOST);
    if !is_upgrade {
        headers.remove(CONNECTION);
    }

    info!(
        origin = %request.uri(),
        target = %url,
        cluster = %target.cluster_name,
        user = %target.impersonate_username,
        "forwarding request"
    );

    // grab the upgrade handle before the body is consumed
    let on_upgrade = is_upgrade.then(|| hyper::upgrade::on(&mut request));

    let method = request.method().clone();
    let body_stream = request.into_body().into_data_stream();

    let upstream = state
        .clients
        .client_for(upstream_transport)
        .request(method, &url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body_stream))
        .send()
        .await
        .map_err(|e| {
            error!(target = %url, error = %e, "upstream dispatch failed");
            HttpError::bad_gateway("unable to forward the request to the target cluster", "")
        })?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    cors::decorate_response_headers(&mut response_headers);

    if status == StatusCode::SWITCHING_PROTOCOLS {
        if let Some(on_upgrade) = on_upgrade {
            tunnel_upgrade(on_upgrade, upstream);
            let mut response = Response::builder()
                .status(status)
                .body(Body::empty())
                .unwrap_or_default();
            *response.headers_mut() = response_headers;
            return Ok(response);
        }
    }

    let mut response = Response::builder()
        .status(status)
        .body(Body::from_stream(
            upstream.bytes_stream().map_err(std::io::Error::other),
        ))
        .unwrap_or_default();
    *response.headers_mut() = response_headers;
    Ok(response)
}

/// Copy bytes both ways between the hijacked client connection and the
/// upgraded upstream connection until either side closes.
fn tunnel_upgrade(on_upgrade: hyper::upgrade::OnUpgrade, upstream: reqwest::Response) {
    tokio::spawn(async move {
        let mut upstream_io = match upstream.upgrade().await {
            Ok(io) => io,
            Err(e) => {
                error!(error = %e, "upstream connection upgrade failed");
                return;
            }
        };
        let client_io = match on_upgrade.await {
            Ok(io) => io,
            Err(e) => {
                error!(error = %e, "client connection upgrade failed");
                return;
            }
        };
        let mut client_io = TokioIo::new(client_io);
        if let Err(e) = tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
            debug!(error = %e, "upgrade tunnel closed");
        }
    });
}

/// Drop every impersonation header supplied by the client. The proxy sets its
/// own identity afterwards; nothing else may reach the member API server.
fn sanitize_impersonation_headers(headers: &mut HeaderMap) {
    let doomed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(IMPERSONATE_PREFIX))
        .cloned()
        .collect();
    for name in doomed {
        headers.remove(&name);
    }
}
