//! Server binary: configuration, stores, workers, HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cloudstore::admin::AdminOps;
use cloudstore::api::{self, AppState, StaticTokenResolver, StorageInfo};
use cloudstore::catalog::Catalog;
use cloudstore::config::{Config, StorageBackend};
use cloudstore::download::DownloadService;
use cloudstore::lifecycle::{self, WorkerContext};
use cloudstore::metadata::{DocumentStore, MemoryStore, Repositories, SledStore};
use cloudstore::models::{AccountStatus, Principal, Role, User};
use cloudstore::quota::QuotaLedger;
use cloudstore::ratelimit::RateLimiter;
use cloudstore::storage::create_provider;
use cloudstore::upload::UploadManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = Config::from_env().context("configuration")?;
    info!(version = cloudstore::VERSION, "starting {}", cloudstore::NAME);

    // Metadata store: persistent sled, except for fully ephemeral setups.
    let sled: Option<Arc<SledStore>> = match cfg.storage.backend {
        StorageBackend::Memory => None,
        _ => Some(Arc::new(
            SledStore::open(&cfg.metadata_path).context("opening metadata store")?,
        )),
    };
    let store: Arc<dyn DocumentStore> = match &sled {
        Some(sled) => sled.clone(),
        None => Arc::new(MemoryStore::new()),
    };

    let storage = create_provider(&cfg.storage).context("building storage provider")?;
    let repos = Repositories::new(Arc::clone(&store));
    let quota = Arc::new(QuotaLedger::new(Arc::clone(&store), cfg.quota.clone(), &cfg.upload));
    let uploads = Arc::new(UploadManager::new(
        Arc::clone(&storage),
        repos.clone(),
        Arc::clone(&quota),
        cfg.upload.clone(),
        cfg.lifecycle.clone(),
        cfg.public_base_url.clone(),
    ));
    let downloads = Arc::new(DownloadService::new(
        Arc::clone(&storage),
        repos.clone(),
        cfg.lifecycle.clone(),
    ));
    let catalog = Arc::new(Catalog::new(Arc::clone(&storage), repos.clone(), Arc::clone(&quota)));
    let admin = Arc::new(AdminOps::new(
        Arc::clone(&storage),
        repos.clone(),
        Arc::clone(&quota),
        cfg.lifecycle.clone(),
    ));
    let limiter = Arc::new(RateLimiter::new(cfg.rate_limit.clone()));

    // Token issuance is external; the built-in resolver only serves the
    // bootstrap admin token for fresh deployments.
    let resolver = Arc::new(StaticTokenResolver::new());
    if let Ok(token) = std::env::var("ADMIN_TOKEN") {
        if !token.trim().is_empty() {
            let admin_id = std::env::var("ADMIN_USER_ID").unwrap_or_else(|_| "admin".to_string());
            if repos.users.get(&admin_id).await.ok().flatten().is_none() {
                let mut user = User::new("admin@localhost", "admin", Role::Admin);
                user.id = admin_id.clone();
                repos.users.put(&user).await.ok();
            }
            resolver.insert(
                token.trim(),
                Principal::new(admin_id, Role::Admin, AccountStatus::Active),
            );
            info!("bootstrap admin token registered");
        }
    }

    let shutdown = CancellationToken::new();
    let workers = lifecycle::spawn_all(
        WorkerContext {
            storage: Arc::clone(&storage),
            repos: repos.clone(),
            quota: Arc::clone(&quota),
            uploads: Arc::clone(&uploads),
            lifecycle: cfg.lifecycle.clone(),
            batch_size: cfg.workers.batch_size,
        },
        &cfg.workers,
        &shutdown,
    );
    info!(count = workers.len(), "lifecycle workers running");

    let state = Arc::new(AppState {
        uploads,
        downloads,
        catalog,
        admin,
        limiter,
        resolver,
        storage_info: StorageInfo {
            provider: storage.name(),
            direct_uploads: storage.supports_presigned_uploads(),
            chunk_size: cfg.upload.chunk_size,
            part_size: cfg.upload.part_size,
            presigned_expiry_seconds: cfg.upload.presigned_expiry.as_secs(),
        },
    });

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    info!(addr = %cfg.bind_addr, provider = storage.name(), "listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(
        listener,
        api::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        serve_shutdown.cancel();
    })
    .await
    .context("http server")?;

    shutdown.cancel();
    for worker in workers {
        let _ = worker.await;
    }
    if let Some(sled) = sled {
        sled.flush().await.ok();
    }
    info!("bye");
    Ok(())
}
