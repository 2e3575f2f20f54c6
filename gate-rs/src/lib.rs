//! gate-rs: minimal HTTP reverse proxy
//!
//! Forwards requests to backends chosen from a static route table. A
//! matched request is sent to the route's target URL *as is*: the target
//! path replaces the request path instead of having the unmatched suffix
//! appended, and only the query string is carried over.
//!
//! # Matching
//!
//! Routes are tried in table order. A route with path `api` matches
//! `/api` and `/api/...` but never `/apikey`. The first matching route
//! wins, even when a later one is more specific.
//!
//! # Example Configuration
//!
//! ```json
//! [
//!   {"name": "api", "path": "api", "target": "http://localhost:9000/api"},
//!   {"name": "webhook", "path": "github-webhook", "target": "http://localhost:8000/webhook"}
//! ]
//! ```
//!
//! With this table `GET /api/users?id=5` reaches the backend as
//! `GET /api?id=5`, and `POST /github-webhook` as `POST /webhook`.

pub mod config;
pub mod error;
pub mod proxy;
pub mod router;

pub use config::{Route, RouteTable, ServerConfig};
pub use error::{ConfigError, ProxyError, Result};
pub use proxy::ProxyServer;
