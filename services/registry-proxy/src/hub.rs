//! Docker Hub normalization rules
//!
//! Docker Hub keeps official images in an implicit `library/` namespace that
//! clients routinely omit. Both request paths and token scopes need the
//! namespace restored before Docker Hub will accept them.

use url::Url;

/// Canonical Docker Hub registry origin.
pub const DOCKER_HUB: &str = "https://registry-1.docker.io";

/// Whether an upstream origin is Docker Hub.
pub(crate) fn is_docker_hub(origin: &Url) -> bool {
    origin.host_str() == Some("registry-1.docker.io")
}

/// Restore the implicit `library/` namespace in a token scope.
///
/// A `type:name:actions` triple whose `name` has no namespace refers to an
/// official image: `repository:busybox:pull` becomes
/// `repository:library/busybox:pull`. Anything else passes through unchanged.
pub(crate) fn normalize_scope(scope: &str) -> String {
    let parts: Vec<&str> = scope.split(':').collect();
    match parts.as_slice() {
        [kind, name, actions] if !name.contains('/') => {
            format!("{kind}:library/{name}:{actions}")
        }
        _ => scope.to_string(),
    }
}

/// Restore the implicit `library/` namespace in a request path.
///
/// Matches `/v2/{name}/{type}/{reference}` where `name` is a bare official
/// image name; names carrying a `.` are left alone, and an already-namespaced
/// path has six segments so it can never re-match. Returns the corrected
/// path, or `None` when no correction applies.
pub(crate) fn library_path(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = path.split('/').collect();
    if parts.len() == 5 && parts[1] == "v2" && !parts[2].contains('.') {
        parts.insert(2, "library");
        Some(parts.join("/"))
    } else {
        None
    }
}
