//! Error types for gate-rs

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Failure to load the route table. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be opened or read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not a JSON array of routes
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment variable holds a value that cannot be used
    #[error("invalid value {value:?} for {name}: {reason}")]
    Env {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Proxy error types
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Route not found
    #[error("No route found for path: {path}")]
    RouteNotFound { path: String },

    /// The matched route's target is not a usable absolute URL
    #[error("Invalid target {target:?} for route {route}: {reason}")]
    InvalidTarget {
        route: String,
        target: String,
        reason: String,
    },

    /// Backend connection error
    #[error("Backend error for route {route}: {reason}")]
    Backend { route: String, reason: String },

    /// Backend did not answer within the configured timeout
    #[error("Backend for route {route} timed out after {timeout_ms}ms")]
    UpstreamTimeout { route: String, timeout_ms: u128 },
}

impl ProxyError {
    /// HTTP status answered to the client for a request-tier error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ProxyError::Backend { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Io(_) | ProxyError::InvalidTarget { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Details stay in the logs; clients only see the reason phrase.
        let body = status.canonical_reason().unwrap_or("Error");
        (status, body).into_response()
    }
}
