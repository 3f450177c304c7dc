//! Expiry worker
//!
//! Two passes per cycle: live files past `expires_at` go through the
//! shared deletion pipeline; soft-deleted records older than the grace
//! period are hard-removed.

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

pub struct ExpiryJob {
    storage: Arc<dyn StorageProvider>,
    repos: Repositories,
    quota: Arc<QuotaLedger>,
    cfg: LifecycleConfig,
    batch: usize,
}

impl ExpiryJob {
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
impl LifecycleJob for ExpiryJob {
    fn name(&self) -> &'static str {
        "expiry"
    }

    async fn run_once(&self) -> ServiceResult<usize> {
        let now = Utc::now();
        let mut processed = 0;

        for file in self.repos.files.expired(now, self.batch).await? {
            retire_file(&self.storage, &self.repos, &self.quota, &file, now).await?;
            debug!(file = %file.id, "expired file retired");
            processed += 1;
        }

        let grace = ChronoDuration::from_std(self.cfg.soft_delete_grace)
            .unwrap_or_else(|_| ChronoDuration::hours(24));
        for file in self.repos.files.soft_deleted_before(now - grace, self.batch).await? {
            self.repos.files.remove(&file.id).await?;
            debug!(file = %file.id, "soft-deleted record hard-removed");
            processed += 1;
        }

        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::testkit::{harness, seed_file, seed_user};
    use crate::models::Role;
    use crate::storage::StorageTier;

    #[tokio::test]
    async fn expired_files_are_retired_and_quota_released() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let file = seed_file(&h, &user, "f1", 100).await;
        h.repos
            .files
            .mutate(&file.id, |f| f.expires_at = Some(Utc::now() - ChronoDuration::hours(1)))
            .await
            .unwrap();

        let job = ExpiryJob::new(
            h.provider.clone(),
            h.repos.clone(),
            h.quota.clone(),
            LifecycleConfig::default(),
            100,
        );
        assert_eq!(job.run_once().await.unwrap(), 1);

        let gone = h.repos.files.get(&file.id).await.unwrap().unwrap();
        assert!(gone.is_deleted);
        assert!(!h.provider.exists(&file.storage_key, StorageTier::Hot).await.unwrap());
        let quota = h.quota.get(&user.id).await.unwrap().unwrap();
        assert_eq!(quota.usage.storage_bytes, 0);
        assert_eq!(quota.usage.file_count, 0);
    }

    #[tokio::test]
    async fn retire_is_idempotent_across_cycles() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let other = seed_file(&h, &user, "keep", 40).await;
        let file = seed_file(&h, &user, "f1", 100).await;
        h.repos
            .files
            .mutate(&file.id, |f| f.expires_at = Some(Utc::now() - ChronoDuration::hours(1)))
            .await
            .unwrap();

        // Two manual retirements simulate a worker retry after a partial
        // failure; the ledger loses the bytes exactly once.
        let now = Utc::now();
        retire_file(&h.provider, &h.repos, &h.quota, &file, now).await.unwrap();
        retire_file(&h.provider, &h.repos, &h.quota, &file, now).await.unwrap();

        let quota = h.quota.get(&user.id).await.unwrap().unwrap();
        assert_eq!(quota.usage.storage_bytes, other.size);
        assert_eq!(quota.usage.file_count, 1);
    }

    #[tokio::test]
    async fn hard_removal_waits_for_grace() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let file = seed_file(&h, &user, "f1", 10).await;
        let now = Utc::now();
        retire_file(&h.provider, &h.repos, &h.quota, &file, now).await.unwrap();

        let job = ExpiryJob::new(
            h.provider.clone(),
            h.repos.clone(),
            h.quota.clone(),
            LifecycleConfig::default(),
            100,
        );
        job.run_once().await.unwrap();
        // Still within grace: the soft-deleted record survives.
        assert!(h.repos.files.get(&file.id).await.unwrap().is_some());

        h.repos
            .files
            .mutate(&file.id, |f| f.deleted_at = Some(now - ChronoDuration::days(2)))
            .await
            .unwrap();
        job.run_once().await.unwrap();
        assert!(h.repos.files.get(&file.id).await.unwrap().is_none());
    }
}
