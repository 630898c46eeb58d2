use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use stash::{FileEntryService, StashConfig};
use stashd::web;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// The stashd file server
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Content root directory. Falls back to the config file, then
    /// STASH_ROOT, then ~/.stash/files.
    #[arg(short = 'd', long)]
    root: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    addr: String,

    /// Optional TOML config file with a [stash] section
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fail PUTs on existing keys instead of overwriting
    #[arg(long)]
    forbid_overwrite: bool,

    /// Rebuild the metadata index from files found under the root before
    /// serving
    #[arg(long)]
    reindex: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => StashConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => StashConfig::from_env().context("failed to load config from environment")?,
    };
    if let Some(root) = cli.root {
        config.root = root;
    }
    if cli.forbid_overwrite {
        config.force_overwrite = false;
    }

    tracing::info!(
        root = %config.root.display(),
        force_overwrite = config.force_overwrite,
        "opening stash"
    );
    let service = Arc::new(FileEntryService::open(&config).context("failed to open file store")?);

    if cli.reindex {
        let count = reindex(&service, &config)?;
        tracing::info!(entries = count, "index rebuilt from content root");
    }

    let app = web::router(web::WebState {
        service: service.clone(),
    });

    let bind_addr: SocketAddr = cli.addr.parse().context("failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("stashd listening on http://{bind_addr}");
    tracing::info!("   Store:  PUT http://{bind_addr}/f  (or /f/{{key}})");
    tracing::info!("   Fetch:  GET http://{bind_addr}/f/{{key}}");
    tracing::info!("   List:   GET http://{bind_addr}/f");
    tracing::info!("   Health: GET http://{bind_addr}/health");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Upsert a metadata record for every plain file under the root, skipping
/// reserved-prefix artifacts such as the index itself.
fn reindex(service: &FileEntryService, config: &StashConfig) -> Result<usize> {
    let mut count = 0;
    for dirent in WalkDir::new(&config.root).min_depth(1).max_depth(1) {
        let dirent = dirent?;
        if !dirent.file_type().is_file() {
            continue;
        }
        let Some(name) = dirent.file_name().to_str() else {
            continue;
        };
        if !stash::is_valid_key(name) {
            continue;
        }
        let entry = service
            .rebuild_index(name)
            .with_context(|| format!("failed to reindex {name}"))?;
        tracing::debug!(key = %entry.key, size = entry.size, "reindexed");
        count += 1;
    }
    Ok(count)
}

/// Handle both SIGINT (Ctrl+C) and SIGTERM (systemd, cargo-watch, etc.)
async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down gracefully");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm =
                    signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("received SIGTERM, shutting down gracefully");
        }
    }
}
