//! Proxy request metrics
//!
//! Per-request counters labelled by response status class and path class.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{global, KeyValue};

/// Global meter for proxy metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("kubesaw-registration"));

/// Counter of proxied requests
///
/// Labels:
/// - `status`: 1xx..5xx
/// - `route`: /api, /workspaces, /plugins, /auth, /proxyhealth, other
pub static PROXIED_REQUESTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kubesaw_proxy_requests_total")
        .with_description("Total number of requests handled by the proxy")
        .with_unit("{requests}")
        .build()
});

/// Record one handled request
pub fn record_request(status: axum::http::StatusCode, path: &str) {
    PROXIED_REQUESTS.add(
        1,
        &[
            KeyValue::new("status", status_class(status)),
            KeyValue::new("route", path_class(path)),
        ],
    );
}

/// Map a status code onto its class label
pub fn status_class(status: axum::http::StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// Map a request path onto its route label
pub fn path_class(path: &str) -> &'static str {
    if path == "/proxyhealth" {
        "/proxyhealth"
    } else if path == "/api" || path.starts_with("/api/") {
        "/api"
    } else if path == "/workspaces" || path.starts_with("/workspaces/") {
        "/workspaces"
    } else if path == "/plugins" || path.starts_with("/plugins/") {
        "/plugins"
    } else if path == "/auth" || path.starts_with("/auth/") || path.starts_with("/.well-known/") {
        "/auth"
    } else {
        "other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_status_class() {
        assert_eq!(status_class(StatusCode::OK), "2xx");
        assert_eq!(status_class(StatusCode::SEE_OTHER), "3xx");
        assert_eq!(status_class(StatusCode::UNAUTHORIZED), "4xx");
        assert_eq!(status_class(StatusCode::BAD_GATEWAY), "5xx");
    }

    #[test]
    fn test_path_class() {
        assert_eq!(path_class("/api/mycoolworkspace/pods"), "/api");
        assert_eq!(path_class("/workspaces/myworkspace/api/pods"), "/workspaces");
        assert_eq!(path_class("/plugins/myplugin/workspaces/w/api"), "/plugins");
        assert_eq!(path_class("/auth/realms/sandbox-dev"), "/auth");
        assert_eq!(path_class("/.well-known/oauth-authorization-server"), "/auth");
        assert_eq!(path_class("/proxyhealth"), "/proxyhealth");
        assert_eq!(path_class("/metrics"), "other");
    }

    #[test]
    fn test_record_request_does_not_panic() {
        record_request(StatusCode::OK, "/api/pods");
    }
}
