use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod app;
mod http;

#[derive(Parser)]
#[command(name = "omnihub-gateway", about = "Omnichannel messaging hub gateway")]
struct Args {
    /// Path to omnihub.toml (default: ~/.omnihub/omnihub.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "omnihub_gateway=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = omnihub_core::config::HubConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        omnihub_core::config::HubConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let state = app::bootstrap(config).await?;
    app::spawn_workers(state.clone()).await?;
    let router = app::build_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Omnihub gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<app::AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    state.shutdown.cancel();
    state.bus.shutdown();
}
