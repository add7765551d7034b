//! metriq collector.
//!
//! Accepts metrics over HTTP, validates and unframes them, and stores them
//! in a [`Repository`](metriq_storage::Repository). The in-memory backend is
//! backed up to a file; the SQLite backend persists on its own.

// deny rather than forbid: config tests mutate env vars
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod http_api;
pub mod ingress;

pub use config::{Cli, ServerConfig};
pub use error::ApiError;
pub use http_api::{AppState, create_router};
pub use ingress::Ingress;

use anyhow::{Context, Result};
use axum::Router;
use metriq_storage::{BackupConfig, Repository, backup, open_repository};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Bind the configured address and serve until `cancel` fires.
pub async fn run(config: ServerConfig, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(&config.address.value)
        .await
        .with_context(|| format!("failed to bind {}", config.address.value))?;
    run_with_listener(config, listener, cancel).await
}

/// Serve on an already-bound listener.
///
/// Shutdown order: stop accepting, drain in-flight requests, then stop the
/// backup so its final save sees every accepted write.
pub async fn run_with_listener(
    config: ServerConfig,
    listener: TcpListener,
    cancel: CancellationToken,
) -> Result<()> {
    let decoder = config.decoder().context("failed to load decryption key")?;
    let repo = open_repository(config.database_dsn.value.as_deref())
        .context("failed to open metric repository")?;

    let backup_cancel = CancellationToken::new();
    let backup_task = if repo.is_durable() {
        None
    } else {
        Some(start_backup(Arc::clone(&repo), config.backup_config(), backup_cancel.clone()).await)
    };

    let router = create_router(AppState::new(repo, Ingress::new(decoder)));
    let served = serve(listener, router, cancel).await;

    backup_cancel.cancel();
    if let Some(task) = backup_task {
        task.await.context("backup task panicked")?;
    }
    served
}

async fn start_backup(
    repo: Arc<dyn Repository>,
    config: BackupConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    if config.restore {
        let target = Arc::clone(&repo);
        let path = config.path.clone();
        match tokio::task::spawn_blocking(move || backup::restore(target.as_ref(), &path)).await {
            Ok(Ok(count)) => info!(count, path = %config.path.display(), "Restored metrics"),
            Ok(Err(e)) => warn!("Failed to restore metrics backup: {}", e),
            Err(e) => warn!("Restore task failed: {}", e),
        }
    }
    backup::start(repo, config, cancel)
}

async fn serve(listener: TcpListener, router: Router, cancel: CancellationToken) -> Result<()> {
    let local = listener.local_addr().context("listener has no local address")?;
    info!(address = %local, "metriqd listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("HTTP server failed")?;
    info!("HTTP server stopped");
    Ok(())
}
