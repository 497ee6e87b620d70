//! CORS handling for the proxy
//!
//! Preflights are answered locally and never forwarded; actual responses get
//! a fixed set of CORS headers after any upstream `Access-Control-*` headers
//! have been stripped, so the proxy's values always win.

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, ORIGIN, VARY};
use axum::http::{Response, StatusCode};

/// Methods accepted in a preflight's Access-Control-Request-Method
const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

/// Value of Access-Control-Allow-Methods on satisfied preflights
const ALLOW_METHODS_VALUE: &str = "PUT, PATCH, POST, GET, DELETE, OPTIONS";

/// Value of Access-Control-Expose-Headers on actual responses
const EXPOSE_HEADERS_VALUE: &str = "Content-Length, Content-Encoding, Authorization";

const ACCESS_CONTROL_REQUEST_METHOD: &str = "access-control-request-method";
const ACCESS_CONTROL_REQUEST_HEADERS: &str = "access-control-request-headers";
const ACCESS_CONTROL_ALLOW_ORIGIN: &str = "access-control-allow-origin";
const ACCESS_CONTROL_ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
const ACCESS_CONTROL_ALLOW_METHODS: &str = "access-control-allow-methods";
const ACCESS_CONTROL_ALLOW_HEADERS: &str = "access-control-allow-headers";
const ACCESS_CONTROL_EXPOSE_HEADERS: &str = "access-control-expose-headers";

/// Answer an OPTIONS preflight.
///
/// A preflight without a requested method is rejected with 401; one without
/// an origin or with an unknown method gets an empty 204. A satisfied
/// preflight echoes the origin and the (canonicalized) requested headers.
pub fn handle_preflight(headers: &HeaderMap) -> Response<Body> {
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    let method = headers
        .get(ACCESS_CONTROL_REQUEST_METHOD)
        .and_then(|v| v.to_str().ok());

    let Some(method) = method else {
        return empty_response(StatusCode::UNAUTHORIZED);
    };
    let Some(origin) = origin else {
        return empty_response(StatusCode::NO_CONTENT);
    };
    if !ALLOWED_METHODS.contains(&method) {
        return empty_response(StatusCode::NO_CONTENT);
    }

    let mut response = empty_response(StatusCode::NO_CONTENT);
    let response_headers = response.headers_mut();
    insert(response_headers, ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    insert(response_headers, ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
    insert(response_headers, ACCESS_CONTROL_ALLOW_METHODS, ALLOW_METHODS_VALUE);
    if let Some(requested) = headers
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .and_then(|v| v.to_str().ok())
    {
        insert(
            response_headers,
            ACCESS_CONTROL_ALLOW_HEADERS,
            &canonicalize_header_list(requested),
        );
    }
    for value in ["Origin", "Access-Control-Request-Method", "Access-Control-Request-Headers"] {
        response_headers.append(VARY, HeaderValue::from_static(value));
    }

    response
}

/// Rewrite the headers of an upstream response: strip every
/// `Access-Control-*` header, then add the proxy's own.
pub fn decorate_response_headers(headers: &mut HeaderMap) {
    let stripped: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("access-control-"))
        .cloned()
        .collect();
    for name in stripped {
        headers.remove(&name);
    }

    insert(headers, ACCESS_CONTROL_ALLOW_ORIGIN, "*");
    insert(headers, ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
    insert(headers, ACCESS_CONTROL_EXPOSE_HEADERS, EXPOSE_HEADERS_VALUE);
    headers.insert(VARY, HeaderValue::from_static("Origin"));
}

/// Canonicalize a comma-separated header-name list the way HTTP header names
/// are conventionally cased: `authorization, content-Type` becomes
/// `Authorization, Content-Type`.
pub fn canonicalize_header_list(list: &str) -> String {
    list.split(',')
        .map(|name| canonical_header_name(name.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn empty_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .expect("static response")
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preflight_headers(entries: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in entries {
            headers.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        headers
    }

    fn has_no_cors_headers(response: &Response<Body>) {
        for name in [
            ACCESS_CONTROL_ALLOW_ORIGIN,
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            ACCESS_CONTROL_ALLOW_HEADERS,
            ACCESS_CONTROL_ALLOW_METHODS,
        ] {
            assert!(response.headers().get(name).is_none(), "{} should be absent", name);
        }
        assert!(response.headers().get(VARY).is_none());
    }

    #[test]
    fn test_preflight_without_request_method_is_unauthorized() {
        let headers = preflight_headers(&[("origin", "https://domain.com")]);
        let response = handle_preflight(&headers);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        has_no_cors_headers(&response);
    }

    #[test]
    fn test_preflight_with_unknown_method() {
        let headers = preflight_headers(&[
            ("origin", "https://domain.com"),
            ("access-control-request-method", "UNKNOWN"),
        ]);
        let response = handle_preflight(&headers);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        has_no_cors_headers(&response);
    }

    #[test]
    fn test_preflight_without_origin() {
        let headers = preflight_headers(&[("access-control-request-method", "GET")]);
        let response = handle_preflight(&headers);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        has_no_cors_headers(&response);
    }

    #[test]
    fn test_satisfied_preflight() {
        let headers = preflight_headers(&[
            ("origin", "https://domain.com"),
            ("access-control-request-method", "GET"),
            ("access-control-request-headers", "Authorization"),
        ]);
        let response = handle_preflight(&headers);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let h = response.headers();
        assert_eq!(h.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "https://domain.com");
        assert_eq!(h.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
        assert_eq!(h.get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(), ALLOW_METHODS_VALUE);
        assert_eq!(h.get(ACCESS_CONTROL_ALLOW_HEADERS).unwrap(), "Authorization");

        let vary: Vec<_> = h.get_all(VARY).iter().collect();
        assert_eq!(
            vary,
            vec!["Origin", "Access-Control-Request-Method", "Access-Control-Request-Headers"]
        );
    }

    #[test]
    fn test_satisfied_preflight_canonicalizes_requested_headers() {
        let headers = preflight_headers(&[
            ("origin", "https://domain.com"),
            ("access-control-request-method", "GET"),
            (
                "access-control-request-headers",
                "Authorization, content-Type, header, second-header, THIRD-HEADER, Numb3r3d-H34d3r",
            ),
        ]);
        let response = handle_preflight(&headers);
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
            "Authorization, Content-Type, Header, Second-Header, Third-Header, Numb3r3d-H34d3r"
        );
    }

    #[test]
    fn test_decorate_response_strips_upstream_cors() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("access-control-allow-origin"),
            "dummy".parse().unwrap(),
        );
        headers.insert(
            HeaderName::from_static("access-control-max-age"),
            "600".parse().unwrap(),
        );
        headers.insert(
            HeaderName::from_static("content-type"),
            "application/json".parse().unwrap(),
        );

        decorate_response_headers(&mut headers);

        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
        assert_eq!(headers.get(ACCESS_CONTROL_EXPOSE_HEADERS).unwrap(), EXPOSE_HEADERS_VALUE);
        assert_eq!(headers.get(VARY).unwrap(), "Origin");
        assert!(headers.get("access-control-max-age").is_none());
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
    }

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("authorization"), "Authorization");
        assert_eq!(canonical_header_name("content-Type"), "Content-Type");
        assert_eq!(canonical_header_name("THIRD-HEADER"), "Third-Header");
        assert_eq!(canonical_header_name("Numb3r3d-H34d3r"), "Numb3r3d-H34d3r");
    }
}
