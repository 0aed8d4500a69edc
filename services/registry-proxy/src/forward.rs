//! Response forwarding pipeline
//!
//! Copies upstream responses onto the client connection and relays general
//! registry traffic upstream. Bodies move chunk by chunk in arrival order;
//! nothing is buffered whole, so multi-gigabyte image layers flow at the
//! pace the client can accept.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::Response;

use crate::api::{Inbound, ProxyState};
use crate::auth;
use crate::error::{ProxyError, ProxyResult};
use crate::hub;

/// Transport-framing response headers, re-derived by the proxy's own HTTP
/// layer rather than copied from upstream.
const FRAMING_HEADERS: [HeaderName; 3] = [
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// Copy an upstream response onto a client response.
///
/// Status and headers are copied verbatim apart from the framing set,
/// duplicate header names included; the body streams through in arrival
/// order. Dropping the response (client disconnect) aborts the upstream
/// transfer with it.
pub(crate) fn client_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = HeaderMap::with_capacity(upstream.headers().len());
    for (name, value) in upstream.headers() {
        if !FRAMING_HEADERS.contains(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Forward a general registry request upstream and relay the answer.
pub(crate) async fn general(
    state: &ProxyState,
    inbound: &Inbound,
    req: Request,
) -> ProxyResult<Response> {
    // Correct bare official-image paths before any upstream contact.
    if inbound.target.is_docker_hub {
        if let Some(path) = hub::library_path(req.uri().path()) {
            tracing::info!(from = %req.uri().path(), to = %path, "redirecting into the library namespace");
            return Ok(library_redirect(&path, req.uri().query()));
        }
    }

    let mut url = inbound
        .target
        .origin
        .join(req.uri().path())
        .map_err(|error| ProxyError::Internal(format!("cannot build upstream URL: {error}")))?;
    url.set_query(req.uri().query());

    let (parts, body) = req.into_parts();
    let headers = upstream_headers(&parts.headers);

    // Docker Hub answers blob downloads with a 307 into object storage; the
    // non-following client surfaces it so it can be intercepted below.
    let client = if inbound.target.is_docker_hub {
        state.direct()
    } else {
        state.client()
    };

    let mut request = client.request(parts.method.clone(), url).headers(headers);
    if parts.method != Method::GET && parts.method != Method::HEAD {
        request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream = request.send().await?;
    tracing::debug!(status = %upstream.status(), "upstream forward");

    if upstream.status() == StatusCode::UNAUTHORIZED {
        return Ok(auth::unauthorized(state.mode(), inbound));
    }

    if inbound.target.is_docker_hub && upstream.status() == StatusCode::TEMPORARY_REDIRECT {
        return follow_blob_redirect(state.client(), upstream).await;
    }

    Ok(client_response(upstream))
}

/// Inbound headers rewritten for the upstream request.
///
/// `connection` is hop-by-hop; `host` and the outbound framing are
/// re-derived by the client from the target URL and the body, so a request
/// never carries both a length and a chunked encoding. `accept-encoding` is
/// dropped so response bodies pass through byte-exact with no content coding
/// to undo.
fn upstream_headers(inbound: &HeaderMap) -> HeaderMap {
    let chunked = inbound
        .get(header::TRANSFER_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"));

    let mut headers = inbound.clone();
    headers.remove(header::CONNECTION);
    headers.remove(header::HOST);
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::ACCEPT_ENCODING);
    if chunked {
        // A chunked inbound request carries no usable length.
        headers.remove(header::CONTENT_LENGTH);
    }
    headers
}

/// `301` into the `library/` namespace, preserving the query string.
fn library_redirect(path: &str, query: Option<&str>) -> Response {
    let location = match query {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    match HeaderValue::from_str(&location) {
        Ok(value) => {
            response.headers_mut().insert(header::LOCATION, value);
        }
        Err(error) => {
            tracing::warn!(%error, %location, "skipping unsettable location header");
        }
    }
    response
}

/// Follow a Docker Hub blob-storage redirect on the client's behalf.
///
/// The redirect target is a signed object-storage URL on a host the client
/// does not trust; the proxy fetches it and relays the result instead of
/// surfacing the redirect.
async fn follow_blob_redirect(
    client: &reqwest::Client,
    upstream: reqwest::Response,
) -> ProxyResult<Response> {
    let location = upstream
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let Some(location) = location else {
        tracing::warn!("docker hub 307 carried no location header");
        return Ok(client_response(upstream));
    };

    tracing::debug!(%location, "following docker hub blob redirect");
    let followed = client.get(location).send().await?;
    Ok(client_response(followed))
}
