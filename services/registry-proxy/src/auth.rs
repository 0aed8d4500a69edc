//! Bearer-token challenge relay
//!
//! Implements the OCI Distribution Spec v2 authentication dance on behalf of
//! registry clients: probing the upstream `/v2/` endpoint, translating its
//! `WWW-Authenticate` challenge, and exchanging credentials for tokens at the
//! upstream's real realm. Clients only ever see the proxy's own challenge.

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use url::Url;

use crate::api::{Inbound, ProxyState};
use crate::config::Mode;
use crate::error::{ProxyError, ProxyResult};
use crate::forward;
use crate::hub;
use crate::routes::RouteTarget;

/// Service name advertised in the proxy's own challenge.
const PROXY_SERVICE: &str = "registry-proxy";

/// A bearer challenge advertised by an upstream registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AuthChallenge {
    /// Token endpoint to fetch bearer tokens from.
    pub realm: String,
    /// Service identifier tokens must be scoped to.
    pub service: String,
}

impl AuthChallenge {
    /// Parse `realm="..."` and `service="..."` pairs out of a
    /// `WWW-Authenticate` value. Both must be present and non-empty; there
    /// are no defaults for a half-formed challenge.
    pub fn parse(header: &str) -> Option<Self> {
        let realm = quoted_value(header, "realm")?;
        let service = quoted_value(header, "service")?;
        if realm.is_empty() || service.is_empty() {
            return None;
        }
        Some(AuthChallenge { realm, service })
    }
}

/// Extract the quoted value of a `key="..."` pair. Key names are
/// case-sensitive.
fn quoted_value(header: &str, key: &str) -> Option<String> {
    let marker = format!("{key}=\"");
    let start = header.find(&marker)? + marker.len();
    let end = header[start..].find('"')? + start;
    Some(header[start..end].to_string())
}

/// Relay the `/v2/` version probe.
///
/// The upstream response passes through untouched unless it is a 401, in
/// which case the client is challenged to authenticate with the proxy
/// instead of the real registry.
pub(crate) async fn relay_probe(
    state: &ProxyState,
    inbound: &Inbound,
    headers: &HeaderMap,
) -> ProxyResult<Response> {
    let mut request = state.client().get(version_url(&inbound.target)?);
    if let Some(authorization) = headers.get(header::AUTHORIZATION) {
        request = request.header(header::AUTHORIZATION, authorization.clone());
    }

    let upstream = request.send().await?;
    tracing::debug!(status = %upstream.status(), "upstream version probe");

    if upstream.status() == StatusCode::UNAUTHORIZED {
        return Ok(unauthorized(state.mode(), inbound));
    }
    Ok(forward::client_response(upstream))
}

/// Relay a token request to the upstream's real token endpoint.
pub(crate) async fn relay_token(
    state: &ProxyState,
    inbound: &Inbound,
    uri: &Uri,
    headers: &HeaderMap,
) -> ProxyResult<Response> {
    // Realm discovery only; the caller's credentials stay out of this probe.
    let probe = state
        .client()
        .get(version_url(&inbound.target)?)
        .send()
        .await?;
    tracing::debug!(status = %probe.status(), "upstream auth requirement check");

    if probe.status() != StatusCode::UNAUTHORIZED {
        // Upstream does not require auth; its answer is the answer.
        return Ok(forward::client_response(probe));
    }

    let challenge_header = probe
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let Some(challenge_header) = challenge_header else {
        // 401 with nothing to translate; forward it as-is.
        return Ok(forward::client_response(probe));
    };

    let challenge = AuthChallenge::parse(&challenge_header).ok_or_else(|| {
        ProxyError::ProtocolViolation(format!(
            "could not parse realm and service from WWW-Authenticate: {challenge_header}"
        ))
    })?;

    let scope = query_param(uri.query(), "scope").map(|scope| {
        if inbound.target.is_docker_hub {
            hub::normalize_scope(&scope)
        } else {
            scope
        }
    });

    let token = fetch_token(
        state.client(),
        &challenge,
        scope.as_deref(),
        headers.get(header::AUTHORIZATION),
    )
    .await?;
    tracing::debug!(status = %token.status(), realm = %challenge.realm, "token fetch");

    // The token endpoint's answer is the payload, whatever its status.
    Ok(forward::client_response(token))
}

/// `GET` the challenge's realm with `service` and `scope` attached.
async fn fetch_token(
    client: &reqwest::Client,
    challenge: &AuthChallenge,
    scope: Option<&str>,
    authorization: Option<&HeaderValue>,
) -> ProxyResult<reqwest::Response> {
    let mut url = Url::parse(&challenge.realm).map_err(|error| {
        ProxyError::ProtocolViolation(format!(
            "invalid realm {realm}: {error}",
            realm = challenge.realm
        ))
    })?;
    url.query_pairs_mut().append_pair("service", &challenge.service);
    if let Some(scope) = scope {
        url.query_pairs_mut().append_pair("scope", scope);
    }

    let mut request = client.get(url);
    if let Some(authorization) = authorization {
        request = request.header(header::AUTHORIZATION, authorization.clone());
    }
    Ok(request.send().await?)
}

/// The proxy's own `401` challenge.
///
/// Points the client at `/v2/auth` on the proxy rather than at the upstream
/// realm; the upstream's challenge never reaches the client.
pub(crate) fn unauthorized(mode: Mode, inbound: &Inbound) -> Response {
    let (scheme, realm_host) = match mode {
        Mode::Debug => ("http", inbound.host.as_str()),
        Mode::Production => ("https", inbound.hostname.as_str()),
    };
    let challenge =
        format!(r#"Bearer realm="{scheme}://{realm_host}/v2/auth",service="{PROXY_SERVICE}""#);

    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(json!({"message": "UNAUTHORIZED"})),
    )
        .into_response()
}

/// The upstream `/v2/` endpoint for a resolved target.
fn version_url(target: &RouteTarget) -> ProxyResult<Url> {
    target.origin.join("/v2/").map_err(|error| {
        ProxyError::Internal(format!(
            "upstream origin {origin} cannot address /v2/: {error}",
            origin = target.origin
        ))
    })
}

/// First value of a query parameter, percent-decoded.
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_parses_realm_and_service() {
        let parsed = AuthChallenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io""#,
        )
        .unwrap();
        assert_eq!(parsed.realm, "https://auth.docker.io/token");
        assert_eq!(parsed.service, "registry.docker.io");
    }

    #[test]
    fn challenge_parse_is_order_insensitive() {
        let parsed = AuthChallenge::parse(
            r#"Bearer service="quay.io",realm="https://quay.io/v2/auth""#,
        )
        .unwrap();
        assert_eq!(parsed.realm, "https://quay.io/v2/auth");
        assert_eq!(parsed.service, "quay.io");
    }

    #[test]
    fn challenge_requires_both_fields() {
        assert_eq!(
            AuthChallenge::parse(r#"Bearer realm="https://auth.example.com/token""#),
            None
        );
        assert_eq!(AuthChallenge::parse(r#"Bearer service="example""#), None);
        assert_eq!(
            AuthChallenge::parse(r#"Bearer realm="",service="example""#),
            None
        );
        assert_eq!(AuthChallenge::parse("Bearer realm=unquoted"), None);
        assert_eq!(AuthChallenge::parse(""), None);
    }

    #[test]
    fn query_param_finds_and_decodes() {
        assert_eq!(
            query_param(Some("scope=repository%3Abusybox%3Apull"), "scope").as_deref(),
            Some("repository:busybox:pull")
        );
        assert_eq!(
            query_param(Some("service=x&scope=a:b:c"), "scope").as_deref(),
            Some("a:b:c")
        );
        assert_eq!(query_param(Some("service=x"), "scope"), None);
        assert_eq!(query_param(None, "scope"), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn token_relay_rewrites_docker_hub_scopes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new()
            .route(
                "/v2/",
                axum::routing::get(move || async move {
                    (
                        StatusCode::UNAUTHORIZED,
                        [(
                            header::WWW_AUTHENTICATE,
                            format!(
                                r#"Bearer realm="http://{addr}/token",service="registry.docker.io""#
                            ),
                        )],
                        "",
                    )
                }),
            )
            .route(
                "/token",
                axum::routing::get(|uri: Uri| async move {
                    uri.query().unwrap_or_default().to_string()
                }),
            );
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let state = ProxyState::new(crate::routes::RouteTable::new(), Mode::Production);
        let inbound = Inbound {
            host: "docker.test".to_string(),
            hostname: "docker.test".to_string(),
            target: RouteTarget {
                origin: Url::parse(&format!("http://{addr}")).unwrap(),
                is_docker_hub: true,
            },
        };
        let uri: Uri = "/v2/auth?scope=repository:busybox:pull".parse().unwrap();

        let response = relay_token(&state, &inbound, &uri, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let query = String::from_utf8(body.to_vec()).unwrap();
        // the bare official-image scope gained its namespace on the way through
        assert!(query.contains("scope=repository%3Alibrary%2Fbusybox%3Apull"));
        assert!(query.contains("service=registry.docker.io"));
    }

    #[test]
    fn unauthorized_realm_tracks_the_operating_mode() {
        let inbound = Inbound {
            host: "docker.example.com:8080".to_string(),
            hostname: "docker.example.com".to_string(),
            target: RouteTarget::from_origin(Url::parse(crate::hub::DOCKER_HUB).unwrap()),
        };

        let production = unauthorized(Mode::Production, &inbound);
        assert_eq!(production.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            production.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            r#"Bearer realm="https://docker.example.com/v2/auth",service="registry-proxy""#
        );

        let debug = unauthorized(Mode::Debug, &inbound);
        assert_eq!(
            debug.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            r#"Bearer realm="http://docker.example.com:8080/v2/auth",service="registry-proxy""#
        );
    }
}
