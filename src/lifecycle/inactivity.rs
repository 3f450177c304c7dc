//! Inactivity worker
//!
//! Applies to every account, premium and admin included: files untouched
//! for `inactivity_days` go through the same deletion pipeline as expired
//! ones.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::debug;

use crate::config::LifecycleConfig;
use crate::error::ServiceResult;
use crate::metadata::Repositories;
use crate::quota::QuotaLedger;
use crate::storage::StorageProvider;

use super::{retire_file, LifecycleJob};

pub struct InactivityJob {
    storage: Arc<dyn StorageProvider>,
    repos: Repositories,
    quota: Arc<QuotaLedger>,
    cfg: LifecycleConfig,
    batch: usize,
}

impl InactivityJob {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        repos: Repositories,
        quota: Arc<QuotaLedger>,
        cfg: LifecycleConfig,
        batch: usize,
    ) -> Self {
        Self { storage, repos, quota, cfg, batch }
    }
}

#[async_trait]
impl LifecycleJob for InactivityJob {
    fn name(&self) -> &'static str {
        "inactivity"
    }

    async fn run_once(&self) -> ServiceResult<usize> {
        let now = Utc::now();
        let cutoff = now - ChronoDuration::days(self.cfg.inactivity_days);
        let mut processed = 0;
        for file in self.repos.files.inactive(cutoff, self.batch).await? {
            retire_file(&self.storage, &self.repos, &self.quota, &file, now).await?;
            debug!(file = %file.id, "inactive file retired");
            processed += 1;
        }
        Ok(processed)
    }
}
