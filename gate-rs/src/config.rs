//! Configuration for gate-rs
//!
//! Routes come from a JSON file; server settings come from the environment.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default route table location
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;

/// A single proxy route
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Route {
    /// Label used in logs only
    pub name: String,
    /// Prefix to match, without leading or trailing slash (e.g. "api")
    pub path: String,
    /// Absolute backend URL; its path replaces the request path
    pub target: String,
}

impl Route {
    /// Create a new route
    pub fn new(name: impl Into<String>, path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            target: target.into(),
        }
    }

    /// Whether a request path (leading slash already stripped) falls under this route.
    ///
    /// Matches on equality or on `path + "/"` as a prefix, so `api` covers
    /// `api` and `api/v1` but not `apikey`.
    pub fn matches(&self, request_path: &str) -> bool {
        match request_path.strip_prefix(self.path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Ordered, immutable list of routes loaded at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Create a table from routes in priority order
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// Load the route table from a JSON file.
    ///
    /// Targets are not validated here; a bad target only fails the
    /// requests routed to it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&content)
    }

    /// Decode a JSON array of route records
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let routes: Vec<Route> = serde_json::from_str(content)?;
        Ok(Self { routes })
    }

    /// Routes in table order
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Route table file
    pub config_path: PathBuf,
    /// Listen address (all interfaces on the configured port)
    pub listen_addr: SocketAddr,
    /// Backend timeout; `None` waits for the transport
    pub upstream_timeout: Option<Duration>,
}

impl ServerConfig {
    /// Read settings from `CONFIG_PATH`, `PORT` and `UPSTREAM_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let config_path = get("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let port = match get("PORT") {
            Some(value) => value.parse::<u16>().map_err(|e| ConfigError::Env {
                name: "PORT",
                value: value.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let upstream_timeout = match get("UPSTREAM_TIMEOUT_SECS") {
            Some(value) => {
                let secs = value.parse::<u64>().map_err(|e| ConfigError::Env {
                    name: "UPSTREAM_TIMEOUT_SECS",
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
                if secs == 0 {
                    return Err(ConfigError::Env {
                        name: "UPSTREAM_TIMEOUT_SECS",
                        value,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            config_path,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            upstream_timeout,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            upstream_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_parse_routes() {
        let json = r#"[
            {"name": "api", "path": "api", "target": "http://localhost:9000/api"},
            {"name": "webhook", "path": "github-webhook", "target": "http://localhost:8000/webhook"}
        ]"#;
        let table = RouteTable::from_json(json).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.routes()[0].name, "api");
        assert_eq!(table.routes()[1].path, "github-webhook");
        assert_eq!(table.routes()[1].target, "http://localhost:8000/webhook");
    }

    #[test]
    fn test_empty_table_loads() {
        let table = RouteTable::from_json("[]").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_invalid_target_still_loads() {
        let json = r#"[{"name": "bad", "path": "bad", "target": "://bad"}]"#;
        let table = RouteTable::from_json(json).unwrap();
        assert_eq!(table.routes()[0].target, "://bad");
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"[{"name": "a", "path": "a", "target": "http://h/", "comment": "x"}]"#;
        assert_eq!(RouteTable::from_json(json).unwrap().len(), 1);
    }

    #[test]
    fn test_wrong_shape_is_parse_error() {
        let err = RouteTable::from_json(r#"{"routes": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = RouteTable::from_json(r#"[{"name": "a", "path": "a"}]"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = RouteTable::from_json("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "api", "path": "api", "target": "http://localhost:9000/api"}}]"#
        )
        .unwrap();

        let table = RouteTable::load(file.path()).unwrap();
        assert_eq!(table.routes(), &[Route::new("api", "api", "http://localhost:9000/api")]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = RouteTable::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("missing.json"));
    }

    #[test]
    fn test_route_matches() {
        let route = Route::new("api", "api", "http://backend/api");
        assert!(route.matches("api"));
        assert!(route.matches("api/"));
        assert!(route.matches("api/v1/users"));
        assert!(!route.matches("apikey"));
        assert!(!route.matches("ap"));
        assert!(!route.matches(""));
        assert!(!route.matches("v1/api"));
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.config_path, PathBuf::from("config.json"));
        assert!(config.upstream_timeout.is_none());
    }

    #[test]
    fn test_server_config_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("CONFIG_PATH", "/etc/gate/routes.json"),
            ("PORT", "9090"),
            ("UPSTREAM_TIMEOUT_SECS", "15"),
        ]))
        .unwrap();
        assert_eq!(config.config_path, PathBuf::from("/etc/gate/routes.json"));
        assert_eq!(config.listen_addr, "0.0.0.0:9090".parse().unwrap());
        assert_eq!(config.upstream_timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_server_config_empty_values_use_defaults() {
        let config =
            ServerConfig::from_lookup(lookup(&[("CONFIG_PATH", ""), ("PORT", "")])).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_server_config_rejects_bad_values() {
        let err = ServerConfig::from_lookup(lookup(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: "PORT", .. }));

        let err = ServerConfig::from_lookup(lookup(&[("PORT", "70000")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: "PORT", .. }));

        let err =
            ServerConfig::from_lookup(lookup(&[("UPSTREAM_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: "UPSTREAM_TIMEOUT_SECS", .. }));
    }
}
