//! Upstream transport selection
//!
//! Upstream requests use timeoutless clients so watch streams and long execs
//! are never cut off. Outside production, TLS verification is skipped so the
//! proxy can talk to self-signed member clusters. SPDY upgrades (kubectl
//! exec/attach) cannot ride HTTP/2, so production requests carrying a
//! `Upgrade: SPDY/3.1` header are pinned to HTTP/1.1.

use axum::http::HeaderMap;

use crate::config::Environment;
use crate::proxy::token::is_spdy_upgrade;

/// The transport variant an upstream request is dispatched over
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpstreamTransport {
    /// Default transport, HTTP/2 allowed
    Default,
    /// HTTP/1.1 only, for SPDY upgrades
    Http1Only,
    /// TLS verification disabled, for non-production environments
    InsecureSkipVerify,
}

/// Select the transport for a request based on environment and headers
pub fn select_transport(environment: Environment, headers: &HeaderMap) -> UpstreamTransport {
    if !environment.is_prod() {
        return UpstreamTransport::InsecureSkipVerify;
    }
    if is_spdy_upgrade(headers) {
        return UpstreamTransport::Http1Only;
    }
    UpstreamTransport::Default
}

/// One pre-built reqwest client per transport variant.
///
/// None of them configures a request timeout; cancellation rides on the
/// request future being dropped when the client goes away.
pub struct UpstreamClients {
    default: reqwest::Client,
    http1_only: reqwest::Client,
    insecure: reqwest::Client,
}

impl UpstreamClients {
    /// Build the client set
    pub fn new() -> Self {
        Self {
            default: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_default(),
            http1_only: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .http1_only()
                .build()
                .unwrap_or_default(),
            insecure: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .danger_accept_invalid_certs(true)
                .build()
                .unwrap_or_default(),
        }
    }

    /// The client for a transport variant
    pub fn client_for(&self, transport: UpstreamTransport) -> &reqwest::Client {
        match transport {
            UpstreamTransport::Default => &self.default,
            UpstreamTransport::Http1Only => &self.http1_only,
            UpstreamTransport::InsecureSkipVerify => &self.insecure,
        }
    }
}

impl Default for UpstreamClients {
    fn default() -> Self {
        Self::new()
    }
}
