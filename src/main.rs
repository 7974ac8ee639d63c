use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use apt_cacher::cacher::{Cacher, CacherOptions};
use apt_cacher::storage::Storage;
use apt_cacher::{config, server};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "apt-cacher", about = "Caching reverse proxy for APT repositories")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short = 'f', long, default_value = "/etc/apt-cacher.toml")]
    config: String,

    /// Socket address to listen on.
    #[arg(short = 'l', long, default_value = "0.0.0.0:3142")]
    listen: String,
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = config::load_config(&cli.config)?;

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %cli.config, "starting apt-cacher");

    // ---- Cache directories ----
    tokio::fs::create_dir_all(&config.meta_dir)
        .await
        .with_context(|| format!("failed to create meta dir: {}", config.meta_dir.display()))?;
    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| format!("failed to create cache dir: {}", config.cache_dir.display()))?;

    // ---- Cacher ----
    let shutdown = CancellationToken::new();
    let cacher = Cacher::new(
        Storage::new(&config.meta_dir, 0),
        Storage::new(&config.cache_dir, config.capacity_bytes()),
        config.url_map()?,
        CacherOptions {
            check_interval: std::time::Duration::from_secs(config.check_interval),
            cache_period: std::time::Duration::from_secs(config.cache_period),
        },
        shutdown.clone(),
    )
    .context("failed to initialise cacher")?;

    // ---- HTTP server ----
    let app = server::create_router(cacher);
    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("failed to bind listener on {}", cli.listen))?;

    tracing::info!(listen = %cli.listen, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                shutdown.cancel();
            }
        })
        .await
        .context("HTTP server error")?;

    shutdown.cancel();
    tracing::info!("apt-cacher shut down cleanly");
    Ok(())
}
