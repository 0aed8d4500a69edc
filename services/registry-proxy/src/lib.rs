//! # Registry Proxy
//!
//! A host-based authenticating reverse proxy for container-image registries,
//! relaying the [OCI Distribution
//! Specification](https://github.com/opencontainers/distribution-spec) v2
//! bearer-token flow.
//!
//! Each virtual hostname under an operator-owned domain maps to one upstream
//! registry (Docker Hub, Quay, GCR, GHCR, ...). Registry clients talk to the
//! proxy as if it were the registry itself: the proxy answers `/v2/` probes
//! with its own authentication challenge, exchanges credentials for tokens at
//! `/v2/auth` on the client's behalf, and streams everything else through
//! unmodified.
//!
//! ## Features
//!
//! - Exact-match virtual-host routing with an optional debug fallback
//! - `WWW-Authenticate` challenge translation and token relay
//! - Docker Hub `library/` namespace correction for paths and token scopes
//! - Manual interception of Docker Hub blob-storage redirects
//! - Chunk-by-chunk body streaming with no whole-body buffering
//!
//! ## Example
//!
//! ```no_run
//! use registry_proxy::ProxyBuilder;
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = ProxyBuilder::new()
//!     .route("quay.example.com", Url::parse("https://quay.io")?)
//!     .build();
//!
//! // Serve the proxy with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod auth;
mod config;
mod error;
mod forward;
mod hub;
mod routes;

pub use api::ProxyBuilder;
pub use config::{ConfigError, DEFAULT_BASE_DOMAIN, Mode, ProxyConfig};
pub use error::{ProxyError, ProxyResult};
pub use hub::DOCKER_HUB;
pub use routes::{RouteTable, RouteTarget};
