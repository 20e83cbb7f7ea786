//! Error types for the memory context engine
//!
//! Provides a single error type shared by every engine component:
//! - Distinct variants for validation, adapter, timeout and cancellation failures
//! - HTTP status code mapping for whatever transport sits in front of the engine
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Downstream collaborator that produced an adapter error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    VectorStore,
    GraphStore,
    Llm,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterKind::VectorStore => "vector store",
            AdapterKind::GraphStore => "graph store",
            AdapterKind::Llm => "llm",
        };
        f.write_str(name)
    }
}

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidStateTransition,

    // Resource errors (4xxx)
    NotFound,

    // External service errors (8xxx)
    VectorStoreError,
    GraphStoreError,
    LlmError,
    UpstreamError,
    Timeout,
    Cancelled,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidStateTransition => 1002,

            ErrorCode::NotFound => 4001,

            ErrorCode::VectorStoreError => 8001,
            ErrorCode::GraphStoreError => 8002,
            ErrorCode::LlmError => 8003,
            ErrorCode::UpstreamError => 8004,
            ErrorCode::Timeout => 8005,
            ErrorCode::Cancelled => 8006,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    // Downstream collaborator errors
    #[error("{adapter} error: {message}")]
    Adapter { adapter: AdapterKind, message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation error without a field
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Shorthand for a validation error on a specific field
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Shorthand for an adapter error
    pub fn adapter(adapter: AdapterKind, message: impl Into<String>) -> Self {
        AppError::Adapter {
            adapter,
            message: message.into(),
        }
    }

    /// Shorthand for a cancellation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        AppError::Cancelled {
            operation: operation.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::Adapter { adapter, .. } => match adapter {
                AdapterKind::VectorStore => ErrorCode::VectorStoreError,
                AdapterKind::GraphStore => ErrorCode::GraphStoreError,
                AdapterKind::Llm => ErrorCode::LlmError,
            },
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::Cancelled { .. } => ErrorCode::Cancelled,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,

            // 499 Client Closed Request
            AppError::Cancelled { .. } => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }

            // 500 Internal Server Error
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Adapter { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled { .. })
    }
}

/// Structured error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let field = match err {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        ErrorResponse {
            error: ErrorDetails {
                code: err.code(),
                message: err.to_string(),
                field,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::from(&self);

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %body.error.message,
                code = ?body.error.code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %body.error.message,
                code = ?body.error.code,
                status = status.as_u16(),
                "Client error"
            );
        }

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string()
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_mapping() {
        let err = AppError::adapter(AdapterKind::GraphStore, "connection refused");
        assert_eq!(err.code(), ErrorCode::GraphStoreError);
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "graph store error: connection refused");
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::invalid_field("query", "query must not be empty");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());

        let body = ErrorResponse::from(&err);
        assert_eq!(body.error.field.as_deref(), Some("query"));
        assert_eq!(body.error.code.as_code(), 1001);
    }

    #[test]
    fn test_timeout_and_cancel_are_distinct() {
        let timeout = AppError::Timeout { operation: "probe".into(), timeout_ms: 500 };
        let cancelled = AppError::cancelled("probe");
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(cancelled.status_code().as_u16(), 499);
        assert!(cancelled.is_cancelled());
        assert!(!timeout.is_cancelled());
    }
}
