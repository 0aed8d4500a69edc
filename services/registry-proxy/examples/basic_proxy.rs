//! Basic registry proxy example
//!
//! Run with: cargo run -p registry-proxy --example basic_proxy

use registry_proxy::{DOCKER_HUB, Mode, ProxyBuilder};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Route one local hostname at Docker Hub; debug mode keeps the
    // synthesized challenge on plain http
    let app = ProxyBuilder::new()
        .route("docker.localhost", Url::parse(DOCKER_HUB)?)
        .mode(Mode::Debug)
        .build();

    // Bind to address
    let addr = "127.0.0.1:3000";
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("registry proxy listening on http://{}", addr);
    tracing::info!("try: curl -H 'Host: docker.localhost' http://{}/v2/", addr);

    // Serve the proxy
    axum::serve(listener, app).await?;

    Ok(())
}
