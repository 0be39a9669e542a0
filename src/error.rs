//! Error types for job-gateway
//!
//! This module provides the error taxonomy of the gateway:
//! - Client errors (invalid submission parameters)
//! - Per-entry queue errors (malformed result messages)
//! - Broker transport errors (retryable)
//! - Artifact service errors (upstream)
//! - HTTP status code mapping and structured JSON error bodies for the API

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for job-gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for job-gateway
#[derive(Debug, Error)]
pub enum Error {
    /// A submission or poll parameter is missing or cannot be parsed
    #[error("invalid input for {field}: {reason}")]
    InvalidInput {
        /// Name of the offending parameter (e.g., "prompt_guidance")
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A single queue entry cannot be parsed or lacks an expected field
    #[error("malformed queue message: {reason}")]
    MalformedMessage {
        /// Correlation key of the entry, when it could be read
        message_id: Option<String>,
        /// What is wrong with the entry
        reason: String,
    },

    /// Broker connectivity, timeout, or protocol failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Artifact service failure
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "IMAGE_SERVICE_URL")
        key: Option<String>,
    },

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidInput`]
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::MalformedMessage`]
    pub fn malformed(message_id: Option<&str>, reason: impl Into<String>) -> Self {
        Error::MalformedMessage {
            message_id: message_id.map(str::to_string),
            reason: reason.into(),
        }
    }
}

/// Broker transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// The call did not complete before its deadline
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Transport operation that timed out ("send", "receive", "acknowledge")
        operation: &'static str,
        /// The deadline that was exceeded
        after: Duration,
    },

    /// The connection was closed at shutdown
    #[error("connection is closed")]
    Closed,

    /// The peek-lock on a delivery expired before it was acknowledged
    #[error("lock lost for message {message_id}")]
    LockLost {
        /// Broker-assigned id of the delivery
        message_id: String,
    },

    /// The broker answered with an unexpected status
    #[error("broker returned status {status}: {body}")]
    Broker {
        /// HTTP status code returned by the broker
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The broker could not be reached
    #[error("connection failed: {0}")]
    Connection(#[from] reqwest::Error),

    /// The broker connection string cannot be parsed
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),
}

/// Artifact service errors
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The artifact service answered with a non-success status
    #[error("artifact service returned status {status} for {artifact_id}")]
    Status {
        /// Artifact that was requested
        artifact_id: String,
        /// HTTP status code returned by the artifact service
        status: u16,
    },

    /// The request could not be sent or its body could not be read
    #[error("artifact request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// API error response format
///
/// Returned by API endpoints when an error occurs.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "invalid_input",
///     "message": "invalid input for uuid: missing required parameter",
///     "details": {
///       "field": "uuid"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "invalid_input", "transport_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - the caller sent something unusable
            Error::InvalidInput { .. } => 400,

            // 502 Bad Gateway - a collaborator produced something unusable
            Error::MalformedMessage { .. } => 502,
            Error::Upstream(_) => 502,

            // 503 Service Unavailable - retryable
            Error::Transport(_) => 503,
            Error::ShuttingDown => 503,

            // 500 Internal Server Error
            Error::Config { .. } => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::InvalidInput { .. } => "invalid_input",
            Error::MalformedMessage { .. } => "malformed_message",
            Error::Transport(e) => match e {
                TransportError::Timeout { .. } => "transport_timeout",
                TransportError::Closed => "transport_closed",
                TransportError::LockLost { .. } => "lock_lost",
                TransportError::Broker { .. } => "broker_error",
                TransportError::Connection(_) => "transport_error",
                TransportError::InvalidConnectionString(_) => "invalid_connection_string",
            },
            Error::Upstream(e) => match e {
                UpstreamError::Status { .. } => "upstream_status",
                UpstreamError::Request(_) => "upstream_error",
            },
            Error::Config { .. } => "config_error",
            Error::ShuttingDown => "shutting_down",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::InvalidInput { field, .. } => Some(serde_json::json!({
                "field": field,
            })),
            Error::MalformedMessage {
                message_id: Some(id),
                ..
            } => Some(serde_json::json!({
                "message_id": id,
            })),
            Error::Upstream(UpstreamError::Status {
                artifact_id,
                status,
            }) => Some(serde_json::json!({
                "artifact_id": artifact_id,
                "upstream_status": status,
            })),
            Error::Transport(TransportError::Timeout { operation, after }) => {
                Some(serde_json::json!({
                    "operation": operation,
                    "timeout_ms": after.as_millis() as u64,
                }))
            }
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
