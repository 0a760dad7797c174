//! Gateway error types with numeric error codes.
//!
//! [`GatewayError`] is the central error type for the gateway. Every
//! variant maps to a stable numeric code that WebSocket replies carry
//! next to the message, and to an HTTP status for REST handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::protocol::ProtocolError;

/// Structured JSON error response body.
///
/// All HTTP error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2002,
///     "message": "no connection to opc.tcp://controller:4840"
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// Gateway error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request              |
/// | 2000–2999 | State/Not Found | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server          | 500 Internal Server Error    |
/// | 5000–5999 | Protocol        | 502 Bad Gateway              |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The browser sent a command the gateway does not know.
    #[error("Method '{0}' not found")]
    UnknownCommand(String),

    /// The operation is not valid in the connection's current state.
    #[error("{operation} not allowed while {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Current connection state.
        state: String,
    },

    /// The connection was terminated and cannot be reused.
    #[error("connection to {0} is terminated")]
    ConnectionTerminated(String),

    /// No connection is registered for the endpoint.
    #[error("no connection to {0}")]
    ConnectionNotFound(String),

    /// Every connect attempt failed.
    #[error("failed to connect to {endpoint} after {attempts} attempts: {source}")]
    Connect {
        /// Target endpoint.
        endpoint: String,
        /// Attempts made.
        attempts: u32,
        /// Last attempt's failure.
        #[source]
        source: ProtocolError,
    },

    /// Subscribing failed; the connection was terminated.
    #[error("failed to subscribe {category} on {endpoint}: {source}")]
    Subscribe {
        /// Target endpoint.
        endpoint: String,
        /// Category being subscribed.
        category: String,
        /// Underlying failure.
        #[source]
        source: ProtocolError,
    },

    /// The session had dropped and reopening it failed.
    #[error("Failed to ensure connection is open: {0}")]
    Reconnect(#[source] Box<GatewayError>),

    /// Protocol collaborator failure outside connect/subscribe.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Json(_) => 1002,
            Self::UnknownCommand(_) => 1003,
            Self::InvalidState { .. } => 2001,
            Self::ConnectionNotFound(_) => 2002,
            Self::ConnectionTerminated(_) => 2003,
            Self::Internal(_) => 3000,
            Self::Io(_) => 3001,
            Self::Protocol(_) => 5000,
            Self::Connect { .. } => 5001,
            Self::Subscribe { .. } => 5002,
            Self::Reconnect(_) => 5003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Json(_) | Self::UnknownCommand(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidState { .. } | Self::ConnectionTerminated(_) => StatusCode::CONFLICT,
            Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Protocol(_)
            | Self::Connect { .. }
            | Self::Subscribe { .. }
            | Self::Reconnect(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
