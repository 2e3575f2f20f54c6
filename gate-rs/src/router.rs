//! Request router for gate-rs
//!
//! Picks the route for an incoming request path. Routes are tried in
//! table order and the first one that matches wins; there is no
//! longest-prefix ordering.

use percent_encoding::percent_decode_str;
use std::borrow::Cow;

use crate::config::{Route, RouteTable};
use crate::error::{ProxyError, Result};

/// Percent-decode a request path before matching (`/my%20svc` -> `/my svc`).
///
/// Byte sequences that are not UTF-8 after decoding are replaced with U+FFFD.
pub fn decode_path(path: &str) -> Cow<'_, str> {
    percent_decode_str(path).decode_utf8_lossy()
}

/// Router for matching request paths to routes
#[derive(Debug, Clone, Default)]
pub struct Router {
    table: RouteTable,
}

impl Router {
    /// Create a new router over the given table. Order is kept as loaded.
    pub fn new(table: RouteTable) -> Self {
        Self { table }
    }

    /// Find the route for a request path such as `/api/users`.
    ///
    /// Exactly one leading slash is stripped before comparing against
    /// route paths.
    pub fn match_route(&self, path: &str) -> Result<&Route> {
        let request_path = path.strip_prefix('/').unwrap_or(path);

        self.table
            .routes()
            .iter()
            .find(|route| route.matches(request_path))
            .ok_or_else(|| ProxyError::RouteNotFound {
                path: path.to_string(),
            })
    }

    /// Get all configured routes
    pub fn routes(&self) -> &[Route] {
        self.table.routes()
    }
}
