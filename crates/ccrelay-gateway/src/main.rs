use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod app;
mod emit;
mod http;
mod txlog;

/// Anthropic-Messages-compatible reverse proxy over a pool of upstream
/// browser-session credentials.
#[derive(Parser)]
#[command(name = "ccrelay-gateway", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings TOML file.
    #[arg(long)]
    settings: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ccrelay_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ccrelay_core::config::RelayConfig::load(cli.settings.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            ccrelay_core::config::RelayConfig::default()
        });
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    // a proxy with no credentials can't serve anything — fail fast
    let credentials_path = PathBuf::from(&config.credentials_path);
    let pool = ccrelay_core::credential::CredentialPool::load(&credentials_path)?;
    let handle = ccrelay_pool::new_handle(pool);

    // keep the watcher alive for the whole process; reloads swap the pool
    // without touching in-flight requests
    let _watcher = ccrelay_pool::watch_credentials(credentials_path, handle.clone())?;

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, handle));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("ccrelay gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
