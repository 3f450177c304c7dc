//! Admin operations
//!
//! Role and standing changes, forced storage actions, and bulk deletion.
//! Every operation requires an admin principal; admins themselves can
//! never be blocked or auto-downgraded.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Months, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::LifecycleConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::lifecycle::retire_file;
use crate::metadata::Repositories;
use crate::models::{AccountStatus, Principal, Role, User};
use crate::quota::QuotaLedger;
use crate::storage::{StorageProvider, StorageTier};

/// Bulk deletion cap per request
pub const BULK_DELETE_CAP: usize = 100;

/// Per-file outcome detail for bulk deletion
#[derive(Debug, Clone, Serialize)]
pub struct BulkItem {
    pub id: String,
    pub reason: String,
}

/// Bulk deletion report; best-effort per file
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteReport {
    pub deleted: Vec<String>,
    pub skipped: Vec<BulkItem>,
    pub failed: Vec<BulkItem>,
}

/// Administrative service over the same stores the core uses
pub struct AdminOps {
    storage: Arc<dyn StorageProvider>,
    repos: Repositories,
    quota: Arc<QuotaLedger>,
    cfg: LifecycleConfig,
}

impl AdminOps {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        repos: Repositories,
        quota: Arc<QuotaLedger>,
        cfg: LifecycleConfig,
    ) -> Self {
        Self { storage, repos, quota, cfg }
    }

    fn require_admin(principal: &Principal) -> ServiceResult<()> {
        if principal.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::forbidden("admin role required"))
        }
    }

    async fn target_user(&self, user_id: &str) -> ServiceResult<User> {
        self.repos
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("user"))
    }

    /// Grant premium; `duration_months = None` means lifetime. Existing
    /// file expiries are cleared.
    pub async fn promote(
        &self,
        principal: &Principal,
        user_id: &str,
        duration_months: Option<u32>,
    ) -> ServiceResult<User> {
        Self::require_admin(principal)?;
        self.target_user(user_id).await?;

        let now = Utc::now();
        let premium_until = match duration_months {
            None => None,
            Some(months) => Some(
                now.checked_add_months(Months::new(months))
                    .ok_or_else(|| ServiceError::validation("duration too far in the future"))?,
            ),
        };
        let (user, _) = self
            .repos
            .users
            .mutate(user_id, |u| {
                u.role = Role::Premium;
                u.premium_expires_at = premium_until;
            })
            .await?
            .ok_or_else(|| ServiceError::not_found("user"))?;
        self.quota
            .apply_role_defaults(user_id, Role::Premium, user.quota_override)
            .await?;

        for file in self.repos.files.list_by_user(user_id).await? {
            if !file.is_deleted && file.expires_at.is_some() {
                self.repos.files.mutate(&file.id, |f| f.expires_at = None).await?;
            }
        }
        info!(user = %user_id, months = ?duration_months, "user promoted to premium");
        Ok(user)
    }

    /// Revoke premium immediately; live files without expiry get the
    /// downgrade grace window
    pub async fn demote(&self, principal: &Principal, user_id: &str) -> ServiceResult<User> {
        Self::require_admin(principal)?;
        self.target_user(user_id).await?;

        let grace = Utc::now() + ChronoDuration::days(self.cfg.downgrade_grace_days);
        let (user, _) = self
            .repos
            .users
            .mutate(user_id, |u| {
                u.role = Role::Free;
                u.premium_expires_at = None;
            })
            .await?
            .ok_or_else(|| ServiceError::not_found("user"))?;
        self.quota.apply_role_defaults(user_id, Role::Free, user.quota_override).await?;

        for file in self.repos.files.live_unexpiring_by_user(user_id).await? {
            self.repos
                .files
                .mutate(&file.id, |f| {
                    if f.expires_at.is_none() {
                        f.expires_at = Some(grace);
                    }
                })
                .await?;
        }
        info!(user = %user_id, "user demoted to free");
        Ok(user)
    }

    /// Block the account and wipe its storage footprint: every object
    /// deleted, every file record hard-removed, quota usage zeroed.
    /// Session revocation is the auth layer's job and happens there.
    pub async fn block(&self, principal: &Principal, user_id: &str) -> ServiceResult<()> {
        Self::require_admin(principal)?;
        let target = self.target_user(user_id).await?;
        if target.role == Role::Admin {
            return Err(ServiceError::forbidden("admin accounts cannot be blocked"));
        }

        self.repos
            .users
            .mutate(user_id, |u| {
                u.status = AccountStatus::Blocked;
                u.is_active = false;
            })
            .await?;

        let mut wiped = 0usize;
        for file in self.repos.files.list_by_user(user_id).await? {
            if let Err(e) = self.storage.delete(&file.storage_key, file.storage_tier).await {
                warn!(file = %file.id, error = %e, "blocked-user object removal failed");
            }
            self.repos.files.remove(&file.id).await?;
            wiped += 1;
        }
        self.quota.get_or_create(user_id, target.role, target.quota_override).await?;
        self.quota.reset_usage(user_id).await?;

        info!(user = %user_id, files = wiped, "user blocked and storage wiped");
        Ok(())
    }

    /// Restrict: account turns read-only, existing files stay reachable
    pub async fn restrict(&self, principal: &Principal, user_id: &str) -> ServiceResult<()> {
        Self::require_admin(principal)?;
        self.target_user(user_id).await?;
        self.repos
            .users
            .mutate(user_id, |u| u.status = AccountStatus::Restricted)
            .await?;
        info!(user = %user_id, "user restricted");
        Ok(())
    }

    /// Reactivate; files removed by a prior block are NOT restored
    pub async fn unblock(&self, principal: &Principal, user_id: &str) -> ServiceResult<()> {
        Self::require_admin(principal)?;
        self.target_user(user_id).await?;
        self.repos
            .users
            .mutate(user_id, |u| {
                u.status = AccountStatus::Active;
                u.is_active = true;
            })
            .await?;
        info!(user = %user_id, "user unblocked");
        Ok(())
    }

    /// Best-effort deletion of up to `BULK_DELETE_CAP` files
    pub async fn bulk_delete(
        &self,
        principal: &Principal,
        file_ids: &[String],
    ) -> ServiceResult<BulkDeleteReport> {
        Self::require_admin(principal)?;
        if file_ids.len() > BULK_DELETE_CAP {
            return Err(ServiceError::validation(format!(
                "at most {} files per bulk delete",
                BULK_DELETE_CAP
            )));
        }

        let now = Utc::now();
        let mut report = BulkDeleteReport::default();
        for id in file_ids {
            match self.repos.files.get(id).await? {
                None => report
                    .skipped
                    .push(BulkItem { id: id.clone(), reason: "not found".to_string() }),
                Some(file) if file.is_deleted => report
                    .skipped
                    .push(BulkItem { id: id.clone(), reason: "already deleted".to_string() }),
                Some(file) => {
                    match retire_file(&self.storage, &self.repos, &self.quota, &file, now).await {
                        Ok(()) => report.deleted.push(id.clone()),
                        Err(e) => report
                            .failed
                            .push(BulkItem { id: id.clone(), reason: e.to_string() }),
                    }
                }
            }
        }
        info!(
            deleted = report.deleted.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "bulk delete finished"
        );
        Ok(report)
    }

    /// Move one file between tiers regardless of access patterns
    pub async fn force_migrate(
        &self,
        principal: &Principal,
        file_id: &str,
        tier: StorageTier,
    ) -> ServiceResult<()> {
        Self::require_admin(principal)?;
        let file = self
            .repos
            .files
            .get(file_id)
            .await?
            .filter(|f| !f.is_deleted)
            .ok_or_else(|| ServiceError::not_found("file"))?;
        if file.storage_tier == tier {
            return Ok(());
        }
        let moved = self.storage.migrate(&file.storage_key, file.storage_tier, tier).await?;
        self.repos
            .files
            .mutate(file_id, |f| {
                f.storage_tier = tier;
                f.storage_key = moved.key.clone();
            })
            .await?;
        info!(file = %file_id, tier = tier.as_str(), "file migrated by admin");
        Ok(())
    }

    /// Set or clear a file's expiry
    pub async fn set_expiry(
        &self,
        principal: &Principal,
        file_id: &str,
        when: Option<DateTime<Utc>>,
    ) -> ServiceResult<()> {
        Self::require_admin(principal)?;
        self.repos
            .files
            .mutate(file_id, |f| f.expires_at = when)
            .await?
            .ok_or_else(|| ServiceError::not_found("file"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::testkit::{harness, seed_file, seed_user, Harness};

    fn admin() -> Principal {
        Principal::new("root", Role::Admin, AccountStatus::Active)
    }

    fn ops(h: &Harness) -> AdminOps {
        AdminOps::new(
            h.provider.clone(),
            h.repos.clone(),
            h.quota.clone(),
            LifecycleConfig::default(),
        )
    }

    #[tokio::test]
    async fn non_admin_is_refused() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let ops = ops(&h);
        let peasant = Principal::new(user.id.clone(), Role::Free, AccountStatus::Active);
        assert!(ops.promote(&peasant, &user.id, None).await.is_err());
    }

    #[tokio::test]
    async fn promote_clears_expiries_and_demote_restores_them() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let file = seed_file(&h, &user, "f1", 10).await;
        h.repos
            .files
            .mutate(&file.id, |f| f.expires_at = Some(Utc::now() + ChronoDuration::days(5)))
            .await
            .unwrap();

        let ops = ops(&h);
        let promoted = ops.promote(&admin(), &user.id, Some(3)).await.unwrap();
        assert_eq!(promoted.role, Role::Premium);
        assert!(promoted.premium_expires_at.is_some());
        assert!(h.repos.files.get(&file.id).await.unwrap().unwrap().expires_at.is_none());

        let demoted = ops.demote(&admin(), &user.id).await.unwrap();
        assert_eq!(demoted.role, Role::Free);
        let expiry = h.repos.files.get(&file.id).await.unwrap().unwrap().expires_at;
        assert!(expiry.is_some());
    }

    #[tokio::test]
    async fn lifetime_promotion_has_no_expiry() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let promoted = ops(&h).promote(&admin(), &user.id, None).await.unwrap();
        assert_eq!(promoted.premium_expires_at, None);
    }

    #[tokio::test]
    async fn block_wipes_files_and_quota() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let files = [
            seed_file(&h, &user, "a", 100).await,
            seed_file(&h, &user, "b", 200).await,
        ];

        ops(&h).block(&admin(), &user.id).await.unwrap();

        let blocked = h.repos.users.get(&user.id).await.unwrap().unwrap();
        assert_eq!(blocked.status, AccountStatus::Blocked);
        assert!(!blocked.is_active);
        for file in &files {
            assert!(h.repos.files.get(&file.id).await.unwrap().is_none());
            assert!(!h.provider.exists(&file.storage_key, file.storage_tier).await.unwrap());
        }
        let quota = h.quota.get(&user.id).await.unwrap().unwrap();
        assert_eq!(quota.usage.storage_bytes, 0);
        assert_eq!(quota.usage.file_count, 0);

        // Unblock restores standing, never the files.
        ops(&h).unblock(&admin(), &user.id).await.unwrap();
        let back = h.repos.users.get(&user.id).await.unwrap().unwrap();
        assert_eq!(back.status, AccountStatus::Active);
        assert!(h.repos.files.list_by_user(&user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn admins_cannot_be_blocked() {
        let h = harness().await;
        let other_admin = seed_user(&h, Role::Admin).await;
        let err = ops(&h).block(&admin(), &other_admin.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Authorization(_)));
    }

    #[tokio::test]
    async fn bulk_delete_reports_each_outcome() {
        let h = harness().await;
        let user = seed_user(&h, Role::Free).await;
        let live = seed_file(&h, &user, "live", 10).await;
        let gone = seed_file(&h, &user, "gone", 10).await;
        h.repos.files.mutate(&gone.id, |f| f.is_deleted = true).await.unwrap();

        let ids = vec![live.id.clone(), gone.id.clone(), "missing".to_string()];
        let report = ops(&h).bulk_delete(&admin(), &ids).await.unwrap();
        assert_eq!(report.deleted, vec![live.id.clone()]);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn bulk_delete_cap_is_enforced() {
        let h = harness().await;
        let ids: Vec<String> = (0..101).map(|i| format!("f{}", i)).collect();
        assert!(ops(&h).bulk_delete(&admin(), &ids).await.is_err());
    }

    #[tokio::test]
    async fn force_migrate_and_set_expiry() {
        let h = harness().await;
        let user = seed_user(&h, Role::Premium).await;
        let file = seed_file(&h, &user, "f1", 10).await;
        let ops = ops(&h);

        ops.force_migrate(&admin(), &file.id, StorageTier::Cold).await.unwrap();
        let moved = h.repos.files.get(&file.id).await.unwrap().unwrap();
        assert_eq!(moved.storage_tier, StorageTier::Cold);
        assert!(moved.storage_key.starts_with("cold/"));

        let when = Utc::now() + ChronoDuration::days(30);
        ops.set_expiry(&admin(), &file.id, Some(when)).await.unwrap();
        assert_eq!(h.repos.files.get(&file.id).await.unwrap().unwrap().expires_at, Some(when));
        ops.set_expiry(&admin(), &file.id, None).await.unwrap();
        assert_eq!(h.repos.files.get(&file.id).await.unwrap().unwrap().expires_at, None);
    }
}
