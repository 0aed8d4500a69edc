//! Proxy configuration
//!
//! Built-in registries hang off a single operator-owned base domain; extra
//! routes and a debug fallback can be layered on top from a TOML file.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use url::Url;

use crate::hub;
use crate::routes::RouteTable;

/// Placeholder domain used until the operator configures their own.
pub const DEFAULT_BASE_DOMAIN: &str = "your-custom-domain.com";

const DEFAULT_TARGET_UPSTREAM: &str = "http://localhost:5000";

/// Registry subdomains mapped onto well-known upstream origins.
const BUILTIN_ROUTES: [(&str, &str); 8] = [
    ("docker", hub::DOCKER_HUB),
    ("quay", "https://quay.io"),
    ("gcr", "https://gcr.io"),
    ("k8s-gcr", "https://k8s.gcr.io"),
    ("k8s", "https://registry.k8s.io"),
    ("ghcr", "https://ghcr.io"),
    ("cloudsmith", "https://docker.cloudsmith.io"),
    ("ecr", "https://public.ecr.aws"),
];

/// Operating mode for the proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Mode {
    /// Unknown hosts are rejected and internal error detail is withheld.
    #[default]
    Production,
    /// Unknown hosts fall back to `target_upstream`, internal error detail
    /// is exposed, and the synthesized challenge realm uses `http`.
    Debug,
}

/// Startup configuration for the proxy process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Operator-owned domain the built-in virtual hostnames hang off of.
    pub base_domain: String,
    /// Operating mode.
    pub mode: Mode,
    /// Fallback upstream for unknown hosts, honored only in debug mode.
    pub target_upstream: Option<Url>,
    /// Bind address for the listener.
    pub listen: SocketAddr,
    /// Additional fully-qualified `host -> origin` routes, layered over the
    /// built-ins.
    pub routes: BTreeMap<String, Url>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            base_domain: DEFAULT_BASE_DOMAIN.to_string(),
            mode: Mode::default(),
            target_upstream: Some(
                Url::parse(DEFAULT_TARGET_UPSTREAM).expect("well-formed default upstream"),
            ),
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            routes: BTreeMap::new(),
        }
    }
}

impl ProxyConfig {
    /// Parse a configuration document.
    pub fn from_toml(raw: &str) -> Result<Self, toml_edit::de::Error> {
        toml_edit::de::from_str(raw)
    }

    /// Load configuration from a TOML file.
    pub fn from_path(path: &Utf8Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Build the immutable route table handed to the host router.
    pub fn route_table(&self) -> RouteTable {
        let mut table = RouteTable::new();
        for (subdomain, origin) in BUILTIN_ROUTES {
            table.insert(
                format!("{subdomain}.{domain}", domain = self.base_domain),
                Url::parse(origin).expect("well-formed builtin origin"),
            );
        }
        for (host, origin) in &self.routes {
            table.insert(host.clone(), origin.clone());
        }
        if self.mode == Mode::Debug {
            if let Some(upstream) = &self.target_upstream {
                table.set_fallback(upstream.as_str());
            }
        }
        table
    }
}

/// Failure to load configuration from disk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("could not read {path}: {source}")]
    Read {
        /// Path that failed to read
        path: Utf8PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The configuration file could not be parsed
    #[error("could not parse {path}: {source}")]
    Parse {
        /// Path that failed to parse
        path: Utf8PathBuf,
        /// Underlying TOML error
        source: toml_edit::de::Error,
    },
}
