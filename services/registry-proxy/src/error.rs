//! Error types for the proxy

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Error types for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The inbound request URL could not be reconstructed
    #[error("invalid request URL: {0}")]
    BadRequest(String),

    /// The inbound hostname has no configured upstream
    #[error("no route for host {host}")]
    NoRoute {
        /// Hostname that failed to resolve
        host: String,
        /// Configured virtual hostnames, echoed to the client
        available: Vec<String>,
    },

    /// An upstream broke the bearer-token contract the relay depends on
    #[error("upstream protocol violation: {0}")]
    ProtocolViolation(String),

    /// Network or transport failure reaching an upstream
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(#[from] reqwest::Error),

    /// A defect surfaced at the request boundary
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::NoRoute { .. } => StatusCode::NOT_FOUND,
            ProxyError::ProtocolViolation(_)
            | ProxyError::UpstreamUnreachable(_)
            | ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert into the client-visible response.
    ///
    /// Internal error detail is only echoed to the client when `diagnostics`
    /// is set; the full detail always reaches the operator via the log.
    pub fn into_client_response(self, diagnostics: bool) -> Response {
        let status = self.status_code();
        let body = match &self {
            ProxyError::BadRequest(details) => json!({
                "error": "Bad Request",
                "details": details,
            }),
            ProxyError::NoRoute { available, .. } => json!({
                "message": "Route not found",
                "available_routes": available,
            }),
            _ => json!({
                "error": "Internal Server Error",
                "details": if diagnostics {
                    self.to_string()
                } else {
                    "An internal error occurred.".to_string()
                },
            }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            ProxyError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::NoRoute {
                host: "x".into(),
                available: vec![]
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::ProtocolViolation("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn no_route_body_lists_available_hosts() {
        let error = ProxyError::NoRoute {
            host: "unknown.test".into(),
            available: vec!["docker.test".into(), "quay.test".into()],
        };

        let body = body_json(error.into_client_response(false)).await;
        assert_eq!(body["message"], "Route not found");
        assert_eq!(
            body["available_routes"],
            serde_json::json!(["docker.test", "quay.test"])
        );
    }

    #[tokio::test]
    async fn internal_detail_is_gated_on_diagnostics() {
        let generic =
            body_json(ProxyError::ProtocolViolation("secret realm".into()).into_client_response(false))
                .await;
        assert_eq!(generic["details"], "An internal error occurred.");

        let detailed =
            body_json(ProxyError::ProtocolViolation("secret realm".into()).into_client_response(true))
                .await;
        assert!(
            detailed["details"]
                .as_str()
                .unwrap()
                .contains("secret realm")
        );
    }
}
