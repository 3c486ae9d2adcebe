//! TFTP Daemon
//!
//! Serves a directory tree over TFTP for network boot: PXE loaders, kernels,
//! initramfs images and per-host config files. Uploads are accepted only
//! when explicitly enabled.
//!
//! Configuration comes from `TFTPD_*` environment variables or the JSON file
//! named by `TFTPD_CONFIG`. Log verbosity follows `RUST_LOG`.

mod backoff;
mod config;
mod error;
mod filesystem;

use anyhow::{Context, Result};
use backoff::FibonacciBackoff;
use config::DaemonConfig;
use error::DaemonError;
use filesystem::DirectoryHandler;
use std::sync::Arc;
use tftp_server::{RequestHandler, TftpServer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting TFTP daemon");

    let config = DaemonConfig::load().context("Failed to load configuration")?;

    info!("Configuration:");
    info!("  Bind address: {}", config.server.bind_addr);
    info!("  Root: {}", config.root.display());
    info!("  Writes: {}", if config.allow_write { "enabled" } else { "disabled" });
    info!("  Overwrite: {}", if config.allow_overwrite { "enabled" } else { "disabled" });
    info!("  Strict opcodes: {}", config.server.strict_opcodes);
    match config.server.idle_timeout_secs {
        Some(secs) => info!("  Idle timeout: {}s", secs),
        None => info!("  Idle timeout: none"),
    }

    let handler: Arc<dyn RequestHandler> = Arc::new(DirectoryHandler::new(
        config.root.clone(),
        config.allow_write,
        config.allow_overwrite,
    ));

    let server = bind_with_retry(&config, handler)
        .await
        .context("Failed to bind TFTP server")?;
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("TFTP daemon stopped");
    Ok(())
}

/// Binds the listening socket, retrying with a Fibonacci backoff while the
/// port is unavailable.
async fn bind_with_retry(config: &DaemonConfig, handler: Arc<dyn RequestHandler>) -> Result<TftpServer, DaemonError> {
    let mut backoff = FibonacciBackoff::new(1, 30);
    let mut attempt: u32 = 0;

    loop {
        match TftpServer::bind(config.server.clone(), Arc::clone(&handler)).await {
            Ok(server) => return Ok(server),
            Err(e) if attempt < config.bind_retries => {
                attempt += 1;
                let delay = backoff.next_backoff();
                warn!(
                    "Bind to {} failed: {} (retry {}/{} in {:?})",
                    config.server.bind_addr, e, attempt, config.bind_retries, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, shutting down");
}
