//! Premium expiry worker
//!
//! Downgrades lapsed subscriptions: role back to free, quota limits
//! re-seeded, and every live file without an expiry gets a grace window
//! instead of living forever. Lifetime premium (`premium_expires_at =
//! None`) and admins are never touched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;

use crate::config::LifecycleConfig;
use crate::error::ServiceResult;
use crate::metadata::Repositories;
use crate::models::Role;
use crate::quota::QuotaLedger;

use super::LifecycleJob;

pub struct PremiumExpiryJob {
    repos: Repositories,
    quota: Arc<QuotaLedger>,
    cfg: LifecycleConfig,
    batch: usize,
}

impl PremiumExpiryJob {
    pub fn new(
        repos: Repositories,
        quota: Arc<QuotaLedger>,
        cfg: LifecycleConfig,
        batch: usize,
    ) -> Self {
        Self { repos, quota, cfg, batch }
    }
}

#[async_trait]
impl LifecycleJob for PremiumExpiryJob {
    fn name(&self) -> &'static str {
        "premium-expiry"
    }

    async fn run_once(&self) -> ServiceResult<usize> {
        let now = Utc::now();
        let grace = now + ChronoDuration::days(self.cfg.downgrade_grace_days);
        let mut processed = 0;

        for user in self.repos.users.lapsed_premium(now, self.batch).await? {
            let quota_override = user.quota_override;
            self.repos
                .users
                .mutate(&user.id, |u| {
                    u.role = Role::Free;
                    u.premium_expires_at = None;
                })
                .await?;
            self.quota.apply_role_defaults(&user.id, Role::Free, quota_override).await?;

            let mut files_touched = 0;
            for file in self.repos.files.live_unexpiring_by_user(&user.id).await? {
                self.repos
                    .files
                    .mutate(&file.id, |f| {
                        if f.expires_at.is_none() {
                            f.expires_at = Some(grace);
                        }
                    })
                    .await?;
                files_touched += 1;
            }

            info!(user = %user.id, files = files_touched, "premium subscription lapsed, downgraded");
            processed += 1;
        }
        Ok(processed)
    }
}
