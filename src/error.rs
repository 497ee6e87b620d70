//! Error type shared by the sign-up API and the proxy
//!
//! The sign-up API renders errors as a JSON envelope
//! `{"status","code","message","details"}`; the proxy pipeline renders the
//! same errors as plain text (`"message: details"`), which several clients
//! match on verbatim.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for service operations
pub type Result<T> = std::result::Result<T, HttpError>;

/// An error carrying the HTTP status and the two-part description used by
/// both error renderings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.text())]
pub struct HttpError {
    /// HTTP status to respond with
    pub status: StatusCode,
    /// Primary description
    pub message: String,
    /// Secondary description; may be filled in later by the HTTP layer
    pub details: String,
}

impl HttpError {
    /// Create an error with an explicit status
    pub fn new(status: StatusCode, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: details.into(),
        }
    }

    /// 401 Unauthorized
    pub fn unauthorized(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, details)
    }

    /// 403 Forbidden
    pub fn forbidden(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message, details)
    }

    /// 404 Not Found
    pub fn not_found(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, details)
    }

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, details)
    }

    /// 429 Too Many Requests
    pub fn too_many_requests(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message, details)
    }

    /// 500 Internal Server Error
    pub fn internal(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, details)
    }

    /// 502 Bad Gateway
    pub fn bad_gateway(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message, details)
    }

    /// Fill in `details` when the originating layer left it empty
    pub fn ensure_details(mut self, details: &str) -> Self {
        if self.details.is_empty() {
            self.details = details.to_string();
        }
        self
    }

    /// The plain-text rendering: `"message: details"`, or just the message
    /// when there are no details.
    pub fn text(&self) -> String {
        if self.details.is_empty() {
            self.message.clone()
        } else {
            format!("{}: {}", self.message, self.details)
        }
    }
}

impl HttpError {
    /// Render this error the way the proxy responds: a plain-text body
    /// holding [`HttpError::text`].
    pub fn plain_response(&self) -> Response {
        use axum::body::Body;
        use axum::http::header::CONTENT_TYPE;

        axum::http::Response::builder()
            .status(self.status)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from(self.text()))
            .unwrap_or_default()
    }
}

impl From<kube::Error> for HttpError {
    fn from(e: kube::Error) -> Self {
        HttpError::internal(e.to_string(), "")
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "status": self.status.canonical_reason().unwrap_or("Unknown"),
            "code": self.status.as_u16(),
            "message": self.message,
            "details": self.details,
        });
        (self.status, axum::Json(body)).into_response()
    }
}
