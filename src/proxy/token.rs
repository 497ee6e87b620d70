//! Bearer-token extraction for plain HTTP and WebSocket upgrades
//!
//! WebSocket clients can't set an Authorization header, so the token travels
//! base64url-encoded inside the `Sec-Websocket-Protocol` header using the
//! `base64url.bearer.authorization.k8s.io.<token>` subprotocol. Exactly one
//! such entry must be present. The upstream rewrite replaces the user token
//! with the cluster's service-account token, preserving the subprotocol
//! suffix.

use axum::http::header::{HeaderMap, HeaderValue, CONNECTION, UPGRADE};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::auth::extract_bearer_token;
use crate::error::HttpError;

/// Subprotocol prefix carrying the bearer token
pub const WS_BEARER_PROTOCOL_PREFIX: &str = "base64url.bearer.authorization.k8s.io.";

/// The WebSocket subprotocol header
pub const SEC_WEBSOCKET_PROTOCOL: &str = "sec-websocket-protocol";

/// Whether the request asks for any protocol upgrade
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    connection_upgrade && headers.contains_key(UPGRADE)
}

/// Whether the request is a WebSocket upgrade
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    is_upgrade_request(headers)
        && headers
            .get(UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
}

/// Whether the request asks for a SPDY/3.1 upgrade (kubectl exec/attach)
pub fn is_spdy_upgrade(headers: &HeaderMap) -> bool {
    is_upgrade_request(headers)
        && headers
            .get(UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("spdy/3.1"))
            .unwrap_or(false)
}

/// Extract the user's bearer token from the request.
///
/// WebSocket upgrades carry it in the subprotocol header; everything else in
/// the Authorization header. Callers wrap the error with their own
/// `"invalid bearer token"` context.
pub fn extract_user_token(headers: &HeaderMap) -> Result<String, HttpError> {
    if is_websocket_upgrade(headers) {
        extract_websocket_token(headers)
    } else {
        extract_bearer_token(headers)
    }
}

fn extract_websocket_token(headers: &HeaderMap) -> Result<String, HttpError> {
    let mut encoded_tokens = Vec::new();
    for value in headers.get_all(SEC_WEBSOCKET_PROTOCOL) {
        let Ok(value) = value.to_str() else { continue };
        for protocol in value.split(',') {
            if let Some(encoded) = protocol.trim().strip_prefix(WS_BEARER_PROTOCOL_PREFIX) {
                if !encoded.is_empty() {
                    encoded_tokens.push(encoded);
                }
            }
        }
    }

    let encoded = match encoded_tokens.as_slice() {
        [] => {
            return Err(HttpError::unauthorized(
                "no base64.bearer.authorization token found",
                "",
            ));
        }
        [token] => *token,
        _ => {
            return Err(HttpError::unauthorized(
                "multiple base64.bearer.authorization tokens specified",
                "",
            ));
        }
    };

    let decoded = URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
        HttpError::unauthorized(
            format!("invalid base64.bearer.authorization token encoding: {}", e),
            "",
        )
    })?;

    String::from_utf8(decoded).map_err(|_| {
        HttpError::unauthorized(
            "invalid base64.bearer.authorization token",
            "contains non UTF-8-encoded runes",
        )
    })
}

/// Rewrite the subprotocol header for the upstream request, replacing the
/// user's bearer segment with the base64url-encoded service-account token.
pub fn rewrite_websocket_protocol(headers: &mut HeaderMap, sa_token: &str) {
    let encoded_sa = URL_SAFE_NO_PAD.encode(sa_token.as_bytes());

    let rewritten: Vec<HeaderValue> = headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(|protocol| {
                    let trimmed = protocol.trim();
                    if trimmed.starts_with(WS_BEARER_PROTOCOL_PREFIX) {
                        format!("{}{}", WS_BEARER_PROTOCOL_PREFIX, encoded_sa)
                    } else {
                        trimmed.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(",")
        })
        .filter_map(|value| HeaderValue::from_str(&value).ok())
        .collect();

    headers.remove(SEC_WEBSOCKET_PROTOCOL);
    for value in rewritten {
        headers.append(SEC_WEBSOCKET_PROTOCOL, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn websocket_headers(protocols: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, "upgrade".parse().unwrap());
        headers.insert(UPGRADE, "websocket".parse().unwrap());
        for p in protocols {
            headers.append(SEC_WEBSOCKET_PROTOCOL, p.parse().unwrap());
        }
        headers
    }

    fn encode(token: &str) -> String {
        URL_SAFE_NO_PAD.encode(token.as_bytes())
    }

    #[test]
    fn test_plain_http_token() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer my-token".parse().unwrap());
        assert_eq!(extract_user_token(&headers).unwrap(), "my-token");
    }

    #[test]
    fn test_plain_http_no_token() {
        let err = extract_user_token(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "no token found: a Bearer token is expected");
    }

    #[test]
    fn test_websocket_token() {
        let headers =
            websocket_headers(&[&format!("{}{},dummy", WS_BEARER_PROTOCOL_PREFIX, encode("token"))]);
        assert_eq!(extract_user_token(&headers).unwrap(), "token");
    }

    #[test]
    fn test_websocket_empty_token() {
        let headers = websocket_headers(&[&format!("{},dummy", WS_BEARER_PROTOCOL_PREFIX)]);
        let err = extract_user_token(&headers).unwrap_err();
        assert_eq!(err.to_string(), "no base64.bearer.authorization token found");
    }

    #[test]
    fn test_websocket_no_header() {
        let headers = websocket_headers(&[]);
        let err = extract_user_token(&headers).unwrap_err();
        assert_eq!(err.to_string(), "no base64.bearer.authorization token found");
    }

    #[test]
    fn test_websocket_empty_header() {
        let headers = websocket_headers(&[""]);
        let err = extract_user_token(&headers).unwrap_err();
        assert_eq!(err.to_string(), "no base64.bearer.authorization token found");
    }

    #[test]
    fn test_websocket_non_bearer_header() {
        let headers = websocket_headers(&["undefined"]);
        let err = extract_user_token(&headers).unwrap_err();
        assert_eq!(err.to_string(), "no base64.bearer.authorization token found");
    }

    #[test]
    fn test_websocket_bare_prefix() {
        let headers = websocket_headers(&[WS_BEARER_PROTOCOL_PREFIX]);
        let err = extract_user_token(&headers).unwrap_err();
        assert_eq!(err.to_string(), "no base64.bearer.authorization token found");
    }

    #[test]
    fn test_websocket_multiple_tokens() {
        let protocol = format!("{}{},dummy", WS_BEARER_PROTOCOL_PREFIX, encode("token"));
        let headers = websocket_headers(&[&protocol, &protocol]);
        let err = extract_user_token(&headers).unwrap_err();
        assert_eq!(
            err.to_string(),
            "multiple base64.bearer.authorization tokens specified"
        );
    }

    #[test]
    fn test_websocket_invalid_base64() {
        let headers = websocket_headers(&[&format!("{}token,dummy", WS_BEARER_PROTOCOL_PREFIX)]);
        let err = extract_user_token(&headers).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("invalid base64.bearer.authorization token encoding:"));
    }

    #[test]
    fn test_websocket_non_utf8_token() {
        let encoded = URL_SAFE_NO_PAD.encode([0x61, 0x61, 0xe2]);
        let headers = websocket_headers(&[&format!("{}{},dummy", WS_BEARER_PROTOCOL_PREFIX, encoded)]);
        let err = extract_user_token(&headers).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid base64.bearer.authorization token: contains non UTF-8-encoded runes"
        );
    }

    #[test]
    fn test_rewrite_websocket_protocol() {
        let mut headers =
            websocket_headers(&[&format!("{}{},dummy", WS_BEARER_PROTOCOL_PREFIX, encode("ssoToken"))]);

        rewrite_websocket_protocol(&mut headers, "clusterSAToken");

        let value = headers.get(SEC_WEBSOCKET_PROTOCOL).unwrap().to_str().unwrap();
        assert_eq!(
            value,
            format!("{}{},dummy", WS_BEARER_PROTOCOL_PREFIX, encode("clusterSAToken"))
        );

        // round trip: decoding the rewritten segment yields the SA token
        let encoded = value
            .split(',')
            .next()
            .unwrap()
            .strip_prefix(WS_BEARER_PROTOCOL_PREFIX)
            .unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "clusterSAToken");
    }

    #[test]
    fn test_upgrade_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_upgrade_request(&headers));

        headers.insert(CONNECTION, "Upgrade".parse().unwrap());
        headers.insert(UPGRADE, "SPDY/3.1".parse().unwrap());
        assert!(is_upgrade_request(&headers));
        assert!(is_spdy_upgrade(&headers));
        assert!(!is_websocket_upgrade(&headers));

        headers.insert(UPGRADE, "websocket".parse().unwrap());
        assert!(is_websocket_upgrade(&headers));
        assert!(!is_spdy_upgrade(&headers));
    }
}
