//! Vantage: per-viewer zoom and color filters over one live camera feed

use std::sync::Arc;

use color_eyre::{eyre::WrapErr, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vantage::capture::{self, CaptureHandle};
use vantage::server::{self, AppState};
use vantage::{Config, LatestFrameBuffer, SettingsStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vantage=info,tower_http=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Vantage Launching...");

    // Load configuration
    let path = std::env::var("VANTAGE_CONFIG").unwrap_or_else(|_| "vantage.toml".into());
    let config = Config::load(&path).wrap_err_with(|| format!("loading config from {path}"))?;
    info!("Configuration: {:?}", config);

    // The camera must open or there is nothing to serve
    let source = match capture::open(&config.capture) {
        Ok(source) => source,
        Err(e) => {
            error!("Could not open capture source: {}", e);
            return Err(e).wrap_err("capture startup failed");
        }
    };

    let buffer = Arc::new(LatestFrameBuffer::new());
    let capture_loop = CaptureHandle::spawn(source, Arc::clone(&buffer))
        .wrap_err("spawning capture thread")?;

    let (stop, shutdown) = watch::channel(false);
    let state = AppState {
        buffer,
        settings: Arc::new(SettingsStore::new(&config.settings)),
        stream: config.stream.clone(),
        shutdown,
    };

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;

    let signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl-C: {}", e);
        }
        info!("Shutdown signal received");
        stop.send_replace(true);
    };
    server::serve(listener, state, signal)
        .await
        .wrap_err("web server error")?;

    // Joining waits for at most one device read
    tokio::task::spawn_blocking(move || capture_loop.shutdown()).await?;

    info!("Vantage shutting down");
    Ok(())
}
