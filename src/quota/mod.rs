//! Quota ledger
//!
//! Per-user storage accounting: admission checks at upload init (advisory)
//! and at finalization (authoritative), with atomic usage updates through
//! the metadata engine. Limits use `-1` as the unlimited sentinel;
//! decrements clamp at zero so a missed increment can never drive usage
//! negative.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{QuotaDefaults, UploadConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::metadata::{collections, Collection, DocumentStore};
use crate::models::Role;

/// Unlimited sentinel for any limit field
pub const UNLIMITED: i64 = -1;

/// Per-user ceilings; -1 = unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub max_storage: i64,
    pub max_file_size: i64,
    pub max_files: i64,
}

impl QuotaLimits {
    fn allows_storage(&self, used: u64, incoming: u64) -> bool {
        self.max_storage == UNLIMITED || used.saturating_add(incoming) <= self.max_storage as u64
    }

    fn allows_file_size(&self, size: u64) -> bool {
        self.max_file_size == UNLIMITED || size <= self.max_file_size as u64
    }

    fn allows_file_count(&self, count: u64) -> bool {
        self.max_files == UNLIMITED || count + 1 <= self.max_files as u64
    }
}

/// Monotonic usage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub storage_bytes: u64,
    pub file_count: u64,
    pub folder_count: u64,
}

/// Quota document, one per user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub user_id: String,
    pub limits: QuotaLimits,
    pub usage: QuotaUsage,
}

/// Admission verdict; reasons list every violated constraint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admission {
    pub allowed: bool,
    pub reasons: Vec<String>,
}

/// Quota accounting over the metadata engine
pub struct QuotaLedger {
    col: Collection<Quota>,
    defaults: QuotaDefaults,
    max_file_size_free: i64,
    max_file_size_premium: i64,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn DocumentStore>, defaults: QuotaDefaults, upload: &UploadConfig) -> Self {
        Self {
            col: Collection::new(store, collections::QUOTAS),
            defaults,
            max_file_size_free: upload.max_file_size_free,
            max_file_size_premium: upload.max_file_size_premium,
        }
    }

    /// Role-seeded limits; an explicit override wins over role defaults
    pub fn limits_for(&self, role: Role, quota_override: Option<QuotaLimits>) -> QuotaLimits {
        if let Some(limits) = quota_override {
            return limits;
        }
        match role {
            Role::Free => QuotaLimits {
                max_storage: self.defaults.free_max_storage,
                max_file_size: self.max_file_size_free,
                max_files: self.defaults.free_max_files,
            },
            Role::Premium | Role::Admin => QuotaLimits {
                max_storage: self.defaults.premium_max_storage,
                max_file_size: self.max_file_size_premium,
                max_files: self.defaults.premium_max_files,
            },
        }
    }

    /// Fetch the user's quota, seeding it from role defaults on first touch
    pub async fn get_or_create(
        &self,
        user_id: &str,
        role: Role,
        quota_override: Option<QuotaLimits>,
    ) -> ServiceResult<Quota> {
        if let Some(quota) = self.col.get(user_id).await? {
            return Ok(quota);
        }
        let quota = Quota {
            user_id: user_id.to_string(),
            limits: self.limits_for(role, quota_override),
            usage: QuotaUsage::default(),
        };
        self.col.put(user_id, &quota).await?;
        Ok(quota)
    }

    /// Advisory admission check; finalization re-checks authoritatively
    pub async fn can_upload(
        &self,
        user_id: &str,
        role: Role,
        quota_override: Option<QuotaLimits>,
        size: u64,
    ) -> ServiceResult<Admission> {
        let quota = self.get_or_create(user_id, role, quota_override).await?;
        let mut reasons = Vec::new();
        if !quota.limits.allows_file_size(size) {
            reasons.push(format!(
                "file of {} bytes exceeds the per-file limit of {} bytes",
                size, quota.limits.max_file_size
            ));
        }
        if !quota.limits.allows_storage(quota.usage.storage_bytes, size) {
            reasons.push(format!(
                "upload would exceed the storage limit of {} bytes",
                quota.limits.max_storage
            ));
        }
        if !quota.limits.allows_file_count(quota.usage.file_count) {
            reasons.push(format!("file count limit of {} reached", quota.limits.max_files));
        }
        Ok(Admission { allowed: reasons.is_empty(), reasons })
    }

    /// Atomic `{storage_bytes += size, file_count += 1}`
    pub async fn add_file(&self, user_id: &str, size: u64) -> ServiceResult<()> {
        self.require_mutate(user_id, |q| {
            q.usage.storage_bytes = q.usage.storage_bytes.saturating_add(size);
            q.usage.file_count += 1;
        })
        .await
    }

    /// Atomic decrement, clamped at zero
    pub async fn remove_file(&self, user_id: &str, size: u64) -> ServiceResult<()> {
        self.require_mutate(user_id, |q| {
            q.usage.storage_bytes = q.usage.storage_bytes.saturating_sub(size);
            q.usage.file_count = q.usage.file_count.saturating_sub(1);
        })
        .await
    }

    pub async fn add_folder(&self, user_id: &str) -> ServiceResult<()> {
        self.require_mutate(user_id, |q| q.usage.folder_count += 1).await
    }

    pub async fn remove_folder(&self, user_id: &str) -> ServiceResult<()> {
        self.require_mutate(user_id, |q| {
            q.usage.folder_count = q.usage.folder_count.saturating_sub(1)
        })
        .await
    }

    /// Re-seed limits after a role change; usage is untouched
    pub async fn apply_role_defaults(
        &self,
        user_id: &str,
        role: Role,
        quota_override: Option<QuotaLimits>,
    ) -> ServiceResult<()> {
        let limits = self.limits_for(role, quota_override);
        self.require_mutate(user_id, |q| q.limits = limits).await
    }

    /// Zero all usage counters; the admin block path
    pub async fn reset_usage(&self, user_id: &str) -> ServiceResult<()> {
        self.require_mutate(user_id, |q| q.usage = QuotaUsage::default()).await
    }

    pub async fn get(&self, user_id: &str) -> ServiceResult<Option<Quota>> {
        Ok(self.col.get(user_id).await?)
    }

    async fn require_mutate<F>(&self, user_id: &str, f: F) -> ServiceResult<()>
    where
        F: FnMut(&mut Quota) + Send,
    {
        self.col
            .mutate(user_id, f)
            .await?
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found("quota"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryStore;

    fn ledger() -> QuotaLedger {
        QuotaLedger::new(
            Arc::new(MemoryStore::new()),
            QuotaDefaults::default(),
            &UploadConfig::default(),
        )
    }

    #[tokio::test]
    async fn seeds_free_defaults_once() {
        let ledger = ledger();
        let quota = ledger.get_or_create("u1", Role::Free, None).await.unwrap();
        assert_eq!(quota.limits.max_storage, 50 * 1024 * 1024 * 1024);
        assert_eq!(quota.limits.max_file_size, 10 * 1024 * 1024 * 1024);
        assert_eq!(quota.usage, QuotaUsage::default());

        ledger.add_file("u1", 10).await.unwrap();
        // Second touch returns the live document, not a fresh seed.
        let quota = ledger.get_or_create("u1", Role::Free, None).await.unwrap();
        assert_eq!(quota.usage.storage_bytes, 10);
    }

    #[tokio::test]
    async fn premium_is_unlimited_by_default() {
        let ledger = ledger();
        let admission = ledger
            .can_upload("u1", Role::Premium, None, u64::MAX / 2)
            .await
            .unwrap();
        assert!(admission.allowed, "{:?}", admission.reasons);
    }

    #[tokio::test]
    async fn admission_collects_every_violation() {
        let ledger = ledger();
        let tiny = QuotaLimits { max_storage: 100, max_file_size: 10, max_files: 0 };
        ledger.get_or_create("u1", Role::Free, Some(tiny)).await.unwrap();

        let admission = ledger.can_upload("u1", Role::Free, Some(tiny), 500).await.unwrap();
        assert!(!admission.allowed);
        assert_eq!(admission.reasons.len(), 3);
    }

    #[tokio::test]
    async fn usage_tracks_adds_and_removals() {
        let ledger = ledger();
        ledger.get_or_create("u1", Role::Free, None).await.unwrap();
        ledger.add_file("u1", 100).await.unwrap();
        ledger.add_file("u1", 50).await.unwrap();
        ledger.remove_file("u1", 100).await.unwrap();

        let quota = ledger.get("u1").await.unwrap().unwrap();
        assert_eq!(quota.usage.storage_bytes, 50);
        assert_eq!(quota.usage.file_count, 1);
    }

    #[tokio::test]
    async fn decrements_clamp_at_zero() {
        let ledger = ledger();
        ledger.get_or_create("u1", Role::Free, None).await.unwrap();
        ledger.remove_file("u1", 1000).await.unwrap();
        ledger.remove_folder("u1").await.unwrap();

        let quota = ledger.get("u1").await.unwrap().unwrap();
        assert_eq!(quota.usage.storage_bytes, 0);
        assert_eq!(quota.usage.file_count, 0);
        assert_eq!(quota.usage.folder_count, 0);
    }

    #[tokio::test]
    async fn role_change_reseeds_limits_not_usage() {
        let ledger = ledger();
        ledger.get_or_create("u1", Role::Premium, None).await.unwrap();
        ledger.add_file("u1", 100).await.unwrap();

        ledger.apply_role_defaults("u1", Role::Free, None).await.unwrap();
        let quota = ledger.get("u1").await.unwrap().unwrap();
        assert_eq!(quota.limits.max_storage, 50 * 1024 * 1024 * 1024);
        assert_eq!(quota.usage.storage_bytes, 100);
    }

    #[tokio::test]
    async fn override_survives_role_defaults() {
        let ledger = ledger();
        let custom = QuotaLimits { max_storage: 7, max_file_size: 7, max_files: 7 };
        ledger.get_or_create("u1", Role::Premium, Some(custom)).await.unwrap();
        ledger.apply_role_defaults("u1", Role::Free, Some(custom)).await.unwrap();
        let quota = ledger.get("u1").await.unwrap().unwrap();
        assert_eq!(quota.limits, custom);
    }
}
