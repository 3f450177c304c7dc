//! Tier migration worker
//!
//! Hot→cold first: live hot files idle past the threshold move to the cold
//! prefix. Cold→hot second: cold files that picked up enough downloads
//! since the last cycle move back. "Downloads since the last cycle" is a
//! per-file watermark the worker snapshots each run; a file flipped in the
//! current cycle is never flipped back in the same cycle.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::LifecycleConfig;
use crate::error::ServiceResult;
use crate::metadata::Repositories;
use crate::storage::{StorageProvider, StorageTier};

use super::LifecycleJob;

pub struct TieringJob {
    storage: Arc<dyn StorageProvider>,
    repos: Repositories,
    cfg: LifecycleConfig,
    batch: usize,
    /// file id -> downloads counter at the end of the previous cycle
    watermarks: DashMap<String, u64>,
}

impl TieringJob {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        repos: Repositories,
        cfg: LifecycleConfig,
        batch: usize,
    ) -> Self {
        Self { storage, repos, cfg, batch, watermarks: DashMap::new() }
    }

    async fn migrate_record(
        &self,
        file_id: &str,
        storage_key: &str,
        from: StorageTier,
        to: StorageTier,
    ) -> ServiceResult<bool> {
        let moved = match self.storage.migrate(storage_key, from, to).await {
            Ok(moved) => moved,
            Err(e) => {
                warn!(file = %file_id, error = %e, "tier migration deferred");
                return Ok(false);
            }
        };
        self.repos
            .files
            .mutate(file_id, |f| {
                f.storage_tier = to;
                f.storage_key = moved.key.clone();
            })
            .await?;
        debug!(file = %file_id, from = from.as_str(), to = to.as_str(), "tier migrated");
        Ok(true)
    }
}

#[async_trait]
impl LifecycleJob for TieringJob {
    fn name(&self) -> &'static str {
        "tiering"
    }

    async fn run_once(&self) -> ServiceResult<usize> {
        let now = Utc::now();
        let mut flipped: HashSet<String> = HashSet::new();
        let mut processed = 0;

        // Hot -> cold is evaluated first each cycle.
        let idle_cutoff = now - ChronoDuration::days(self.cfg.hot_to_cold_days);
        for file in self.repos.files.on_tier(StorageTier::Hot, Some(idle_cutoff), self.batch).await? {
            if self
                .migrate_record(&file.id, &file.storage_key, StorageTier::Hot, StorageTier::Cold)
                .await?
            {
                flipped.insert(file.id.clone());
                processed += 1;
            }
        }

        // Cold -> hot for download bursts since the previous cycle.
        let cold = self.repos.files.on_tier(StorageTier::Cold, None, self.batch).await?;
        let mut seen: HashSet<String> = HashSet::new();
        for file in cold {
            seen.insert(file.id.clone());
            let watermark = self.watermarks.get(&file.id).map(|w| *w);
            let promote = match watermark {
                // First sight of this cold file: establish the baseline,
                // never promote on the all-time counter.
                None => false,
                Some(mark) => {
                    file.downloads.saturating_sub(mark) >= self.cfg.cold_to_hot_downloads
                }
            };
            if promote
                && !flipped.contains(&file.id)
                && self
                    .migrate_record(&file.id, &file.storage_key, StorageTier::Cold, StorageTier::Hot)
                    .await?
            {
                flipped.insert(file.id.clone());
                processed += 1;
            }
            self.watermarks.insert(file.id.clone(), file.downloads);
        }
        // Files freshly demoted this cycle start their baseline now.
        for id in &flipped {
            if !seen.contains(id) {
                if let Some(file) = self.repos.files.get(id).await? {
                    self.watermarks.insert(id.clone(), file.downloads);
                    seen.insert(id.clone());
                }
            }
        }
        self.watermarks.retain(|id, _| seen.contains(id));

        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::testkit::{harness, seed_file, seed_user};
    use crate::models::Role;

    fn job_over(h: &crate::lifecycle::testkit::Harness) -> TieringJob {
        TieringJob::new(h.provider.clone(), h.repos.clone(), LifecycleConfig::default(), 100)
    }

    #[tokio::test]
    async fn idle_hot_file_moves_to_cold() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let file = seed_file(&h, &user, "f1", 10).await;
        h.repos
            .files
            .mutate(&file.id, |f| f.last_access_at = Utc::now() - ChronoDuration::days(8))
            .await
            .unwrap();

        let job = job_over(&h);
        assert_eq!(job.run_once().await.unwrap(), 1);

        let moved = h.repos.files.get(&file.id).await.unwrap().unwrap();
        assert_eq!(moved.storage_tier, StorageTier::Cold);
        assert!(moved.storage_key.starts_with("cold/"));
        assert!(!h.provider.exists(&file.storage_key, StorageTier::Hot).await.unwrap());
        assert!(h.provider.exists(&moved.storage_key, StorageTier::Cold).await.unwrap());
    }

    #[tokio::test]
    async fn demotion_and_promotion_never_share_a_cycle() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let file = seed_file(&h, &user, "f1", 10).await;
        h.repos
            .files
            .mutate(&file.id, |f| {
                f.last_access_at = Utc::now() - ChronoDuration::days(8);
                f.downloads = 100;
            })
            .await
            .unwrap();

        let job = job_over(&h);
        job.run_once().await.unwrap();
        // Demoted this cycle; the download burst baseline starts fresh.
        let after = h.repos.files.get(&file.id).await.unwrap().unwrap();
        assert_eq!(after.storage_tier, StorageTier::Cold);
    }

    #[tokio::test]
    async fn download_burst_promotes_cold_file_next_cycle() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let file = seed_file(&h, &user, "f1", 10).await;
        h.repos
            .files
            .mutate(&file.id, |f| f.last_access_at = Utc::now() - ChronoDuration::days(8))
            .await
            .unwrap();

        let job = job_over(&h);
        job.run_once().await.unwrap(); // demote; baseline established

        // Quiet cycle: no promotion on zero new downloads.
        assert_eq!(job.run_once().await.unwrap(), 0);

        h.repos.files.mutate(&file.id, |f| f.downloads += 5).await.unwrap();
        assert_eq!(job.run_once().await.unwrap(), 1);

        let promoted = h.repos.files.get(&file.id).await.unwrap().unwrap();
        assert_eq!(promoted.storage_tier, StorageTier::Hot);
        assert!(promoted.storage_key.starts_with("hot/"));
    }

    #[tokio::test]
    async fn slow_drip_never_promotes() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let file = seed_file(&h, &user, "f1", 10).await;
        h.repos
            .files
            .mutate(&file.id, |f| f.last_access_at = Utc::now() - ChronoDuration::days(8))
            .await
            .unwrap();

        let job = job_over(&h);
        job.run_once().await.unwrap();
        for _ in 0..4 {
            h.repos.files.mutate(&file.id, |f| f.downloads += 1).await.unwrap();
            assert_eq!(job.run_once().await.unwrap(), 0);
        }
        assert_eq!(
            h.repos.files.get(&file.id).await.unwrap().unwrap().storage_tier,
            StorageTier::Cold
        );
    }
}
