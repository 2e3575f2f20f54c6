//! HTTP Reverse Proxy Server
//!
//! Every request is matched against the route table and forwarded to the
//! route's target URL. The target's path replaces the request path
//! entirely; only the query string of the original request is carried over.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{
        header, request::Parts, uri::Authority, uri::Scheme, HeaderMap, HeaderName, HeaderValue,
        Request, Response, StatusCode, Uri, Version,
    },
    response::IntoResponse,
    routing::any,
    Router,
};
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{Route, RouteTable, ServerConfig};
use crate::error::{ProxyError, Result};
use crate::router::{decode_path, Router as ProxyRouter};

/// HTTP client type for forwarding requests
type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Headers that only apply to a single connection and are never forwarded
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared proxy state
pub struct ProxyState {
    /// Request router
    pub router: ProxyRouter,
    /// HTTP client for forwarding
    pub client: HttpClient,
    /// Optional limit on waiting for backend response headers
    pub upstream_timeout: Option<Duration>,
}

/// A route target resolved into the pieces the outbound URI is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub authority: Authority,
    pub path: String,
}

impl Target {
    /// Parse a route's target URL. Requires a scheme and a host.
    pub fn parse(route: &Route) -> Result<Self> {
        let invalid = |reason: String| ProxyError::InvalidTarget {
            route: route.name.clone(),
            target: route.target.clone(),
            reason,
        };

        let url = Url::parse(&route.target).map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host".to_string()))?;

        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let authority = Authority::try_from(authority.as_str()).map_err(|e| invalid(e.to_string()))?;
        let scheme = Scheme::try_from(url.scheme()).map_err(|e| invalid(e.to_string()))?;

        let path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };

        Ok(Self {
            scheme,
            authority,
            path,
        })
    }
}

/// Protocol requested through `Connection: upgrade` plus `Upgrade`, if any
pub fn upgrade_type(headers: &HeaderMap) -> Option<HeaderValue> {
    let requested = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    if requested {
        headers.get(header::UPGRADE).cloned()
    } else {
        None
    }
}

/// Rewrite an inbound request head so it addresses `target`.
///
/// Scheme, authority and path come from the target; the query comes from
/// the inbound request (the target's own query is dropped). Method, body
/// and end-to-end headers are left alone. A protocol upgrade request keeps
/// its `Connection: upgrade` and `Upgrade` headers.
pub fn rewrite(
    mut parts: Parts,
    target: &Target,
    client_addr: Option<SocketAddr>,
) -> std::result::Result<Parts, axum::http::Error> {
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{}", target.path, query),
        None => target.path.clone(),
    };

    parts.uri = Uri::builder()
        .scheme(target.scheme.clone())
        .authority(target.authority.clone())
        .path_and_query(path_and_query)
        .build()?;

    // The backend connection is always HTTP/1.1
    parts.version = Version::HTTP_11;

    let upgrade = upgrade_type(&parts.headers);
    strip_hop_by_hop(&mut parts.headers);
    if let Some(protocol) = upgrade {
        parts
            .headers
            .insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
        parts.headers.insert(header::UPGRADE, protocol);
    }

    parts
        .headers
        .insert(header::HOST, HeaderValue::from_str(target.authority.as_str())?);

    if let Some(addr) = client_addr {
        append_forwarded_for(&mut parts.headers, addr)?;
    }

    Ok(parts)
}

/// Remove hop-by-hop headers, including any listed in `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

fn append_forwarded_for(
    headers: &mut HeaderMap,
    addr: SocketAddr,
) -> std::result::Result<(), axum::http::Error> {
    // Joined as raw bytes so values that are not UTF-8 stay in the chain
    let mut value = Vec::new();
    for prior in headers.get_all("x-forwarded-for") {
        value.extend_from_slice(prior.as_bytes());
        value.extend_from_slice(b", ");
    }
    value.extend_from_slice(addr.ip().to_string().as_bytes());

    headers.insert("x-forwarded-for", HeaderValue::from_bytes(&value)?);
    Ok(())
}

/// Proxy server
pub struct ProxyServer {
    config: ServerConfig,
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Create a new proxy server
    pub fn new(config: ServerConfig, routes: RouteTable) -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();

        let client: HttpClient = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(connector);

        let state = Arc::new(ProxyState {
            router: ProxyRouter::new(routes),
            client,
            upstream_timeout: config.upstream_timeout,
        });

        Self { config, state }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/*path", any(proxy_handler))
            .route("/", any(proxy_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Configured routes in match order
    pub fn routes(&self) -> &[Route] {
        self.state.router.routes()
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// In-flight requests are drained before returning.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!("Server listening on {}", addr);

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

/// Main proxy handler - forwards requests to backends
async fn proxy_handler(
    State(state): State<Arc<ProxyState>>,
    req: Request<Body>,
) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let decoded = decode_path(&path);

    let route = match state.router.match_route(&decoded) {
        Ok(route) => route,
        Err(e) => {
            warn!(method = %method, path = %path, "No route found for path");
            return e.into_response();
        }
    };

    info!(
        method = %method,
        path = %path,
        route = %route.name,
        target = %route.target,
        "Proxying request"
    );

    match forward(&state, route, req).await {
        Ok(response) => response,
        Err(e) => {
            match &e {
                ProxyError::InvalidTarget { .. } => {
                    error!(route = %route.name, error = %e, "Failed to parse target URL")
                }
                _ => error!(route = %route.name, path = %path, error = %e, "Proxy error"),
            }
            e.into_response()
        }
    }
}

/// Send the rewritten request to the route's backend and relay its response
async fn forward(state: &ProxyState, route: &Route, mut req: Request<Body>) -> Result<Response<Body>> {
    let target = Target::parse(route)?;

    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let upgrade = upgrade_type(req.headers());
    let client_upgrade = upgrade.as_ref().map(|_| hyper::upgrade::on(&mut req));

    let (parts, body) = req.into_parts();
    let parts = rewrite(parts, &target, client_addr).map_err(|e| ProxyError::InvalidTarget {
        route: route.name.clone(),
        target: route.target.clone(),
        reason: e.to_string(),
    })?;

    debug!("Forwarding to: {}", parts.uri);

    let pending = state.client.request(Request::from_parts(parts, body));
    let result = match state.upstream_timeout {
        Some(limit) => tokio::time::timeout(limit, pending).await.map_err(|_| {
            ProxyError::UpstreamTimeout {
                route: route.name.clone(),
                timeout_ms: limit.as_millis(),
            }
        })?,
        None => pending.await,
    };

    let response = result.map_err(|e| ProxyError::Backend {
        route: route.name.clone(),
        reason: e.to_string(),
    })?;

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        if let (Some(requested), Some(client_upgrade)) = (upgrade, client_upgrade) {
            return splice_upgrade(route, &requested, client_upgrade, response);
        }
    }

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Ok(Response::from_parts(parts, Body::new(body)))
}

/// Relay a `101 Switching Protocols` answer and join the two upgraded
/// connections once the client side has switched too.
fn splice_upgrade(
    route: &Route,
    requested: &HeaderValue,
    client_upgrade: OnUpgrade,
    mut response: Response<Incoming>,
) -> Result<Response<Body>> {
    let granted = response.headers().get(header::UPGRADE).cloned();
    let same_protocol = granted
        .as_ref()
        .is_some_and(|g| g.as_bytes().eq_ignore_ascii_case(requested.as_bytes()));
    if !same_protocol {
        return Err(ProxyError::Backend {
            route: route.name.clone(),
            reason: format!(
                "backend switched to protocol {:?}, requested {:?}",
                granted, requested
            ),
        });
    }

    let backend_upgrade = hyper::upgrade::on(&mut response);
    let route_name = route.name.clone();

    tokio::spawn(async move {
        let (client, backend) = match tokio::try_join!(client_upgrade, backend_upgrade) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(route = %route_name, error = %e, "Upgrade failed");
                return;
            }
        };

        let mut client = TokioIo::new(client);
        let mut backend = TokioIo::new(backend);
        match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
            Ok((to_backend, to_client)) => debug!(
                route = %route_name,
                to_backend,
                to_client,
                "Upgraded connection closed"
            ),
            Err(e) => debug!(route = %route_name, error = %e, "Upgraded connection ended"),
        }
    });

    let (parts, _) = response.into_parts();
    Ok(Response::from_parts(parts, Body::empty()))
}

/// Resolves on Ctrl-C or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
