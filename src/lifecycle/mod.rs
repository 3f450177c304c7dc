//! Lifecycle workers
//!
//! Five periodic jobs share one runner: expiry, inactivity, tier
//! migration, premium downgrade, and upload-session GC. Each tick handles
//! one batch; per-item failures are logged and land in the next cycle's
//! scan instead of blocking the batch. Shutdown is cooperative through a
//! cancellation token and never interrupts an item mid-flight.

mod expiry;
mod inactivity;
mod premium;
mod sessions;
mod tiering;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::ServiceResult;
use crate::metadata::Repositories;
use crate::models::FileRecord;
use crate::quota::QuotaLedger;
use crate::storage::StorageProvider;
use crate::upload::UploadManager;

pub use expiry::ExpiryJob;
pub use inactivity::InactivityJob;
pub use premium::PremiumExpiryJob;
pub use sessions::SessionGcJob;
pub use tiering::TieringJob;

/// One periodic background job
#[async_trait]
pub trait LifecycleJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handle one batch; returns how many items were processed
    async fn run_once(&self) -> ServiceResult<usize>;
}

/// Run `job` every `interval` until the token fires
pub fn spawn(
    job: Arc<dyn LifecycleJob>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(job = job.name(), "lifecycle worker stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match job.run_once().await {
                        Ok(0) => debug!(job = job.name(), "cycle idle"),
                        Ok(n) => info!(job = job.name(), items = n, "cycle done"),
                        Err(e) => warn!(job = job.name(), error = %e, "cycle failed, retrying next tick"),
                    }
                }
            }
        }
    })
}

/// Everything the standard job set needs
pub struct WorkerContext {
    pub storage: Arc<dyn StorageProvider>,
    pub repos: Repositories,
    pub quota: Arc<QuotaLedger>,
    pub uploads: Arc<UploadManager>,
    pub lifecycle: crate::config::LifecycleConfig,
    pub batch_size: usize,
}

/// Spawn the full worker set; handles stop when `shutdown` fires
pub fn spawn_all(
    ctx: WorkerContext,
    workers: &WorkerConfig,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let WorkerContext { storage, repos, quota, uploads, lifecycle, batch_size } = ctx;
    let expiry = Arc::new(ExpiryJob::new(
        Arc::clone(&storage),
        repos.clone(),
        Arc::clone(&quota),
        lifecycle.clone(),
        batch_size,
    ));
    let inactivity = Arc::new(InactivityJob::new(
        Arc::clone(&storage),
        repos.clone(),
        Arc::clone(&quota),
        lifecycle.clone(),
        batch_size,
    ));
    let tiering = Arc::new(TieringJob::new(
        Arc::clone(&storage),
        repos.clone(),
        lifecycle.clone(),
        batch_size,
    ));
    let premium = Arc::new(PremiumExpiryJob::new(repos, quota, lifecycle, batch_size));
    let gc = Arc::new(SessionGcJob::new(uploads, batch_size));

    vec![
        spawn(expiry, workers.expiry_interval, shutdown.clone()),
        spawn(inactivity, workers.inactivity_interval, shutdown.clone()),
        spawn(tiering, workers.tiering_interval, shutdown.clone()),
        spawn(premium, workers.premium_interval, shutdown.clone()),
        spawn(gc, workers.session_gc_interval, shutdown.clone()),
    ]
}

/// Shared deletion pipeline: drop the object (absent counts as done), then
/// soft-delete the record, then decrement the ledger exactly once. Hard
/// removal happens later, after the grace period.
pub(crate) async fn retire_file(
    storage: &Arc<dyn StorageProvider>,
    repos: &Repositories,
    quota: &QuotaLedger,
    file: &FileRecord,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    storage.delete(&file.storage_key, file.storage_tier).await?;

    let newly_deleted = repos
        .files
        .mutate(&file.id, |f| {
            if f.is_deleted {
                false
            } else {
                f.is_deleted = true;
                f.deleted_at = Some(now);
                true
            }
        })
        .await?
        .map(|(_, fresh)| fresh)
        .unwrap_or(false);

    // The mutate above decides the winner; only it may decrement, so a
    // worker retry can never double-subtract.
    if newly_deleted {
        quota.remove_file(&file.user_id, file.size).await?;
    }
    Ok(())
}
