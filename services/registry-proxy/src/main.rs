//! Registry proxy server binary

use camino::Utf8PathBuf;
use clap::Parser;
use registry_proxy::{DEFAULT_BASE_DOMAIN, Mode, ProxyBuilder, ProxyConfig};
use tracing_subscriber::EnvFilter;

/// Host-based authenticating proxy for container-image registries.
#[derive(Debug, Parser)]
#[command(name = "registry-proxy-server", version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Bind address, overriding the configuration file.
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,

    /// Operating mode, overriding the configuration file.
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Base domain for the built-in virtual hosts.
    #[arg(long)]
    base_domain: Option<String>,

    /// Fallback upstream origin for unknown hosts in debug mode.
    #[arg(long)]
    target_upstream: Option<url::Url>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ProxyConfig::from_path(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(base_domain) = args.base_domain {
        config.base_domain = base_domain;
    }
    if let Some(target_upstream) = args.target_upstream {
        config.target_upstream = Some(target_upstream);
    }

    if config.mode == Mode::Production && config.base_domain == DEFAULT_BASE_DOMAIN {
        tracing::warn!("base_domain is not configured; built-in routes will not match real hosts");
    }

    let table = config.route_table();
    tracing::info!(mode = ?config.mode, "starting registry proxy");
    for (host, origin) in table.entries() {
        tracing::info!("route {host} -> {origin}");
    }
    if config.mode == Mode::Debug {
        if let Some(upstream) = &config.target_upstream {
            tracing::info!(%upstream, "debug fallback upstream");
        }
    }

    let app = ProxyBuilder::new().routes(table).mode(config.mode).build();

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves when the process is asked to stop.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl-c handler must install");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler must install")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
