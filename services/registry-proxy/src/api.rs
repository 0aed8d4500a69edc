//! Proxy builder, shared state, and request dispatch

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::any;
use url::Url;

use crate::auth;
use crate::config::Mode;
use crate::error::{ProxyError, ProxyResult};
use crate::forward;
use crate::routes::{RouteTable, RouteTarget};

/// Proxy builder for configuring and creating the registry proxy service
#[derive(Debug, Default)]
pub struct ProxyBuilder {
    routes: RouteTable,
    mode: Mode,
}

impl ProxyBuilder {
    /// Create a new proxy builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a fully built route table
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Map a virtual hostname onto an upstream origin
    pub fn route(mut self, host: impl Into<String>, origin: Url) -> Self {
        self.routes.insert(host, origin);
        self
    }

    /// Set the operating mode
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Configure the fallback upstream used for unmatched hosts
    pub fn fallback_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.routes.set_fallback(upstream);
        self
    }

    /// Build the proxy service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        let state = ProxyState::new(self.routes, self.mode);

        Router::new()
            .route("/v2/", any(version_probe))
            .route("/v2/auth", any(token_relay))
            .fallback(forward_general)
            .with_state(state)
    }
}

/// Shared, read-only state cloned into every request task.
#[derive(Debug, Clone)]
pub(crate) struct ProxyState {
    routes: Arc<RouteTable>,
    mode: Mode,
    client: reqwest::Client,
    direct: reqwest::Client,
}

impl ProxyState {
    pub(crate) fn new(routes: RouteTable, mode: Mode) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("TLS backend must be available");
        let direct = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("TLS backend must be available");

        ProxyState {
            routes: Arc::new(routes),
            mode,
            client,
            direct,
        }
    }

    /// Upstream client that follows redirects.
    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Upstream client that surfaces redirects instead of following them.
    pub(crate) fn direct(&self) -> &reqwest::Client {
        &self.direct
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }
}

/// Routing decision for one inbound request.
#[derive(Debug)]
pub(crate) struct Inbound {
    /// Verbatim `Host` header value, port included.
    pub host: String,
    /// Hostname alone, used for route lookup.
    pub hostname: String,
    /// Resolved upstream registry.
    pub target: RouteTarget,
}

/// Reconstruct the requested URL and resolve its upstream registry.
fn resolve(state: &ProxyState, req: &Request) -> ProxyResult<Inbound> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let requested = format!("http://{host}{uri}", uri = req.uri());
    let url = Url::parse(&requested)
        .map_err(|error| ProxyError::BadRequest(format!("{requested}: {error}")))?;
    let hostname = url
        .host_str()
        .ok_or_else(|| ProxyError::BadRequest(format!("{requested}: no host")))?
        .to_owned();

    let target = state
        .routes
        .resolve(&hostname)
        .ok_or_else(|| ProxyError::NoRoute {
            host: hostname.clone(),
            available: state.routes.hosts(),
        })?;
    tracing::info!(host = %hostname, path = %req.uri().path(), upstream = %target.origin, "routing request");

    Ok(Inbound {
        host: host.to_owned(),
        hostname,
        target,
    })
}

async fn version_probe(State(state): State<ProxyState>, req: Request) -> Response {
    let result = match resolve(&state, &req) {
        Ok(inbound) => auth::relay_probe(&state, &inbound, req.headers()).await,
        Err(error) => Err(error),
    };
    finish(&state, result)
}

async fn token_relay(State(state): State<ProxyState>, req: Request) -> Response {
    let result = match resolve(&state, &req) {
        Ok(inbound) => auth::relay_token(&state, &inbound, req.uri(), req.headers()).await,
        Err(error) => Err(error),
    };
    finish(&state, result)
}

async fn forward_general(State(state): State<ProxyState>, req: Request) -> Response {
    let result = match resolve(&state, &req) {
        Ok(inbound) => forward::general(&state, &inbound, req).await,
        Err(error) => Err(error),
    };
    finish(&state, result)
}

/// Single outer boundary: every failure becomes a terminal client response.
fn finish(state: &ProxyState, result: ProxyResult<Response>) -> Response {
    match result {
        Ok(response) => response,
        Err(error) => {
            if error.status_code().is_server_error() {
                tracing::error!(%error, "request failed");
            } else {
                tracing::info!(%error, "request rejected");
            }
            error.into_client_response(state.mode() == Mode::Debug)
        }
    }
}
