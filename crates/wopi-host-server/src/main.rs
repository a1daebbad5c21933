//! WOPI host server.
//!
//! Serves documents from S3 (or a local directory) to a WOPI editor such as
//! Collabora Online:
//! - Validates the editor's access token
//! - Tracks per-document locks in process
//! - Refuses saves from anyone but the current lock holder

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wopi_host_core::{
    AccessContext, ContentAccessGateway, FileInfoAssembler, LockManager, MemoryStorage,
    StorageGateway,
};

mod auth;
mod config;
mod error;
mod handlers;
mod routes;
mod storage;

use auth::TokenValidator;
use config::{Config, StorageBackend};
use handlers::{AppState, LaunchConfig};
use storage::{LocalStorage, S3Storage, TimeoutStorage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    info!("Starting wopi-host-server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Host: {}", config.host);
    info!("  Port: {}", config.port);
    info!("  Backend: {}", config.storage_backend);
    info!("  Lock TTL: {}s", config.lock_ttl_secs);
    info!("  Max upload: {} bytes", config.max_upload_bytes);

    let storage = create_storage(&config).await?;
    let storage: Arc<dyn StorageGateway> = match config.storage_timeout() {
        Some(timeout) => {
            info!("  Storage timeout: {}s", timeout.as_secs());
            Arc::new(TimeoutStorage::new(storage, timeout))
        }
        None => storage,
    };
    let storage_backend = storage.backend_name();

    let locks = Arc::new(
        LockManager::new(config.lock_ttl()).with_unlock_policy(config.unlock_policy.into()),
    );
    info!("  Unlock policy: {:?}", locks.unlock_policy());
    info!("  Unlocked write policy: {:?}", config.unlocked_write_policy);

    let validator = TokenValidator::new(
        config.access_token.clone(),
        AccessContext {
            user_id: config.user_id.clone(),
            user_friendly_name: config.user_friendly_name.clone(),
            can_write: config.user_can_write,
        },
    );
    if validator.enabled() {
        info!("  Auth: access token required");
    } else {
        warn!("  Auth: DISABLED (no access token configured)");
        warn!("  Set WOPI_ACCESS_TOKEN to require a token on WOPI requests");
    }

    if let Some(interval) = config.lock_reap_interval() {
        info!("  Lock reaper every {}s", interval.as_secs());
        spawn_lock_reaper(locks.clone(), interval);
    }

    // Build application state
    let state = AppState {
        locks: locks.clone(),
        file_info: Arc::new(FileInfoAssembler::new(
            storage.clone(),
            locks.clone(),
            config.owner_id.clone(),
        )),
        content: Arc::new(ContentAccessGateway::new(
            storage,
            locks,
            config.unlocked_write_policy.into(),
            config.max_upload_bytes,
        )),
        validator: Arc::new(validator),
        launch: Arc::new(LaunchConfig {
            wopi_host_domain: config.wopi_host_domain.clone(),
            collabora_domain: config.collabora_domain.clone(),
        }),
        storage_backend,
    };

    let app = routes::router(state);

    // Bind and serve
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the storage gateway selected by the configuration.
async fn create_storage(config: &Config) -> anyhow::Result<Arc<dyn StorageGateway>> {
    let storage: Arc<dyn StorageGateway> = match config.storage_backend {
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .context("S3_BUCKET is required with --storage-backend s3")?;
            let s3 = S3Storage::from_config(config, bucket).await;
            info!("  S3 bucket: {}", s3.bucket_name());
            if let Some(endpoint) = &config.s3_endpoint {
                info!("  S3 endpoint: {}", endpoint);
            }
            Arc::new(s3)
        }
        StorageBackend::Local => {
            let local = LocalStorage::new(config.effective_local_storage_dir());
            info!("  Local storage dir: {}", local.base_dir().display());
            Arc::new(local)
        }
        StorageBackend::Memory => {
            warn!("  Memory storage: documents are lost on shutdown");
            Arc::new(MemoryStorage::new())
        }
    };
    Ok(storage)
}

/// Periodically drop expired lock records. Expiry is already enforced on
/// every access; this only bounds memory.
fn spawn_lock_reaper(locks: Arc<LockManager>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = locks.purge_expired();
            debug!("Lock reaper removed {} expired locks", removed);
        }
    });
}

/// Resolves on Ctrl+C, or SIGTERM on unix, so in-flight saves can finish.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, draining connections"),
            Err(e) => {
                warn!("Ctrl+C handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, draining connections");
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
