//! Virtual-host routing
//!
//! Maps inbound hostnames onto upstream registry origins. The table is built
//! once at startup and never mutated afterwards; request tasks share it
//! read-only.

use std::collections::BTreeMap;

use url::Url;

use crate::hub;

/// Immutable mapping from virtual hostname to upstream registry origin.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, Url>,
    fallback: Option<String>,
}

/// An upstream registry resolved for one request.
#[derive(Debug, Clone)]
pub struct RouteTarget {
    /// Scheme and host of the upstream registry.
    pub origin: Url,
    /// Whether the upstream is Docker Hub, which needs namespace and
    /// redirect special-casing.
    pub is_docker_hub: bool,
}

impl RouteTarget {
    /// Build a target from an upstream origin.
    pub fn from_origin(origin: Url) -> Self {
        let is_docker_hub = hub::is_docker_hub(&origin);
        RouteTarget {
            origin,
            is_docker_hub,
        }
    }
}

impl RouteTable {
    /// Create an empty route table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a virtual hostname onto an upstream origin.
    pub fn insert(&mut self, host: impl Into<String>, origin: Url) {
        self.routes.insert(host.into(), origin);
    }

    /// Configure a fallback upstream used when no hostname matches.
    ///
    /// The value is kept verbatim and validated at resolution time, so a
    /// misconfigured fallback surfaces as "no route" rather than a panic.
    pub fn set_fallback(&mut self, upstream: impl Into<String>) {
        self.fallback = Some(upstream.into());
    }

    /// All configured virtual hostnames.
    pub fn hosts(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// Configured `host -> origin` pairs, in hostname order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Url)> {
        self.routes
            .iter()
            .map(|(host, origin)| (host.as_str(), origin))
    }

    /// Resolve a hostname to its upstream registry.
    ///
    /// Lookup is exact string equality, no partial matches. An unmatched
    /// hostname falls back to the configured fallback upstream, if any; a
    /// fallback that does not parse as an absolute URL is a configuration
    /// defect and resolves to nothing.
    pub fn resolve(&self, hostname: &str) -> Option<RouteTarget> {
        if let Some(origin) = self.routes.get(hostname) {
            return Some(RouteTarget::from_origin(origin.clone()));
        }

        let fallback = self.fallback.as_deref()?;
        match Url::parse(fallback) {
            Ok(origin) => Some(RouteTarget::from_origin(origin)),
            Err(error) => {
                tracing::error!(%error, fallback, "fallback upstream is not a valid URL");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        let mut table = RouteTable::new();
        table.insert(
            "docker.example.com",
            Url::parse("https://registry-1.docker.io").unwrap(),
        );
        table.insert("quay.example.com", Url::parse("https://quay.io").unwrap());
        table
    }

    #[test]
    fn exact_match_resolves_the_configured_upstream() {
        let target = table().resolve("quay.example.com").unwrap();
        assert_eq!(target.origin.as_str(), "https://quay.io/");
        assert!(!target.is_docker_hub);
    }

    #[test]
    fn docker_hub_routes_are_flagged() {
        assert!(table().resolve("docker.example.com").unwrap().is_docker_hub);
    }

    #[test]
    fn unmatched_host_resolves_to_nothing() {
        assert!(table().resolve("gcr.example.com").is_none());
        // no partial or suffix matching
        assert!(table().resolve("example.com").is_none());
        assert!(table().resolve("sub.quay.example.com").is_none());
    }

    #[test]
    fn fallback_covers_unmatched_hosts() {
        let mut table = table();
        table.set_fallback("http://localhost:5000");

        let target = table.resolve("anything.test").unwrap();
        assert_eq!(target.origin.as_str(), "http://localhost:5000/");
    }

    #[test]
    fn invalid_fallback_is_a_defect_not_a_route() {
        let mut table = table();
        table.set_fallback("not a url");

        assert!(table.resolve("anything.test").is_none());
        // configured routes still resolve
        assert!(table.resolve("quay.example.com").is_some());
    }

    #[test]
    fn hosts_are_listed_in_order() {
        assert_eq!(
            table().hosts(),
            vec!["docker.example.com", "quay.example.com"]
        );
    }
}
