//! Download service
//!
//! Streams bytes out of the storage provider while keeping the counters
//! honest: third-party downloads bump the monotonic counter, feed the
//! bounded unique-IP set, refresh `last_access_at`, and may shorten a free
//! user's file expiry once the distinct-downloader threshold trips. Owner
//! and admin downloads stream with no side effects at all.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, DateTime, Utc};
use tracing::debug;

use crate::config::LifecycleConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::metadata::Repositories;
use crate::models::{FileRecord, FileView, Principal, Role};
use crate::storage::{ByteRange, ByteStream, StorageProvider};

/// Response envelope for a streamed download
pub struct Download {
    pub stream: ByteStream,
    pub meta: DownloadMeta,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("stream", &"<ByteStream>")
            .field("meta", &self.meta)
            .finish()
    }
}

/// Header material for the HTTP edge
#[derive(Debug, Clone)]
pub struct DownloadMeta {
    pub file_name: String,
    pub mime_type: String,
    /// Whole-object size in bytes
    pub total_size: u64,
    /// Bytes this response carries
    pub content_length: u64,
    /// Satisfied range as `(first, last)` when the request was partial
    pub range: Option<(u64, u64)>,
}

/// Access rules, counters, and anti-abuse expiry over the storage stream
pub struct DownloadService {
    storage: Arc<dyn StorageProvider>,
    repos: Repositories,
    cfg: LifecycleConfig,
}

impl DownloadService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        repos: Repositories,
        cfg: LifecycleConfig,
    ) -> Self {
        Self { storage, repos, cfg }
    }

    /// Non-sensitive metadata; available to anyone while the file is live,
    /// and to the owner or an admin regardless of expiry
    pub async fn info(
        &self,
        file_id: &str,
        principal: Option<&Principal>,
    ) -> ServiceResult<FileView> {
        let file = self.live_record(file_id).await?;
        if file.is_expired(Utc::now()) && !Self::is_owner_or_admin(&file, principal) {
            return Err(ServiceError::not_found("file"));
        }
        Ok(FileView::from(&file))
    }

    /// Stream the file, applying counter and anti-abuse side effects for
    /// third-party downloads
    pub async fn download(
        &self,
        file_id: &str,
        principal: Option<&Principal>,
        client_ip: &str,
        range: Option<ByteRange>,
    ) -> ServiceResult<Download> {
        let now = Utc::now();
        let file = self.live_record(file_id).await?;
        if file.is_expired(now) {
            return Err(ServiceError::not_found("file"));
        }

        if !Self::is_owner_or_admin(&file, principal) {
            self.record_third_party_download(&file, client_ip, now).await?;
        }

        let content_length = match range {
            None => file.size,
            Some(r) => r
                .length_within(file.size)
                .ok_or(ServiceError::RangeNotSatisfiable { size: file.size })?,
        };
        let stream = self.storage.stream(&file.storage_key, file.storage_tier, range).await?;
        let satisfied = range.map(|r| (r.start, r.start + content_length - 1));

        Ok(Download {
            stream,
            meta: DownloadMeta {
                file_name: file.original_name.clone(),
                mime_type: file.mime_type.clone(),
                total_size: file.size,
                content_length,
                range: satisfied,
            },
        })
    }

    async fn live_record(&self, file_id: &str) -> ServiceResult<FileRecord> {
        let file = self
            .repos
            .files
            .get(file_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("file"))?;
        if file.is_deleted {
            return Err(ServiceError::not_found("file"));
        }
        Ok(file)
    }

    fn is_owner_or_admin(file: &FileRecord, principal: Option<&Principal>) -> bool {
        principal.map_or(false, |p| p.is_admin() || p.user_id == file.user_id)
    }

    /// Atomic counter updates plus the anti-abuse expiry shortening; the
    /// whole decision runs inside one document mutation
    async fn record_third_party_download(
        &self,
        file: &FileRecord,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let owner_is_free = match self.repos.users.get(&file.user_id).await? {
            Some(owner) => owner.effective_role(now) == Role::Free,
            None => true,
        };
        let cap = self.cfg.unique_ip_cap;
        let threshold = self.cfg.download_threshold;
        let shortened_expiry = now + ChronoDuration::days(self.cfg.days_after_threshold);
        let ip = client_ip.to_string();

        let (updated, shortened) = self
            .repos
            .files
            .mutate(&file.id, |f| {
                f.downloads += 1;
                if !f.unique_download_ips.iter().any(|known| *known == ip)
                    && f.unique_download_ips.len() < cap
                {
                    f.unique_download_ips.push(ip.clone());
                }
                f.last_access_at = now;

                // Shorten, never extend: a free user's widely-shared file
                // loses its remaining lifetime.
                if owner_is_free && f.unique_download_ips.len() >= threshold {
                    let farther = f.expires_at.map_or(true, |t| t > shortened_expiry);
                    if farther {
                        f.expires_at = Some(shortened_expiry);
                        return true;
                    }
                }
                false
            })
            .await?
            .ok_or_else(|| ServiceError::not_found("file"))?;

        if shortened {
            debug!(
                file = %updated.id,
                unique_ips = updated.unique_download_ips.len(),
                "anti-abuse expiry shortening applied"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryStore;
    use crate::models::{AccountStatus, User};
    use crate::storage::{MemoryStorage, StorageTier};
    use bytes::Bytes;
    use futures::StreamExt;

    struct Fixture {
        service: DownloadService,
        repos: Repositories,
        storage: Arc<MemoryStorage>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let repos = Repositories::new(store);
        let storage = Arc::new(MemoryStorage::new());
        let service = DownloadService::new(
            storage.clone(),
            repos.clone(),
            LifecycleConfig::default(),
        );
        Fixture { service, repos, storage }
    }

    async fn seed_file(fx: &Fixture, owner_role: Role, expires_in_days: Option<i64>) -> FileRecord {
        let user = User::new("o@x", "owner", owner_role);
        fx.repos.users.put(&user).await.unwrap();
        let stored = fx
            .storage
            .write(
                &format!("{}/k/data.bin", user.id),
                Bytes::from_static(b"0123456789"),
                StorageTier::Hot,
                None,
            )
            .await
            .unwrap();
        let file = FileRecord {
            id: "f1".into(),
            user_id: user.id.clone(),
            folder_id: None,
            original_name: "data.bin".into(),
            mime_type: "application/octet-stream".into(),
            size: 10,
            storage_key: stored.key,
            storage_tier: StorageTier::Hot,
            hash: None,
            downloads: 0,
            unique_download_ips: Vec::new(),
            last_access_at: Utc::now(),
            expires_at: expires_in_days.map(|d| Utc::now() + ChronoDuration::days(d)),
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
        };
        fx.repos.files.insert(&file).await.unwrap();
        file
    }

    async fn body_of(download: Download) -> Vec<u8> {
        let mut out = Vec::new();
        let mut stream = download.stream;
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn anonymous_download_counts_and_tracks_ip() {
        let fx = fixture().await;
        let file = seed_file(&fx, Role::Free, Some(5)).await;

        let dl = fx.service.download(&file.id, None, "1.1.1.1", None).await.unwrap();
        assert_eq!(dl.meta.content_length, 10);
        assert_eq!(body_of(dl).await, b"0123456789");

        let updated = fx.repos.files.get(&file.id).await.unwrap().unwrap();
        assert_eq!(updated.downloads, 1);
        assert_eq!(updated.unique_download_ips, vec!["1.1.1.1".to_string()]);
    }

    #[tokio::test]
    async fn owner_download_has_no_side_effects() {
        let fx = fixture().await;
        let file = seed_file(&fx, Role::Free, Some(5)).await;
        let owner = Principal::new(file.user_id.clone(), Role::Free, AccountStatus::Active);

        fx.service.download(&file.id, Some(&owner), "9.9.9.9", None).await.unwrap();
        let updated = fx.repos.files.get(&file.id).await.unwrap().unwrap();
        assert_eq!(updated.downloads, 0);
        assert!(updated.unique_download_ips.is_empty());
        assert_eq!(updated.expires_at, file.expires_at);
    }

    #[tokio::test]
    async fn threshold_shortens_free_user_expiry_once() {
        let fx = fixture().await;
        let file = seed_file(&fx, Role::Free, Some(5)).await;

        for i in 0..5 {
            fx.service
                .download(&file.id, None, &format!("10.0.0.{}", i), None)
                .await
                .unwrap();
        }
        let updated = fx.repos.files.get(&file.id).await.unwrap().unwrap();
        let shortened = updated.expires_at.unwrap();
        assert!(shortened <= Utc::now() + ChronoDuration::days(1) + ChronoDuration::minutes(1));

        // Another distinct IP must not extend the already-shortened expiry.
        fx.service.download(&file.id, None, "10.0.1.1", None).await.unwrap();
        let again = fx.repos.files.get(&file.id).await.unwrap().unwrap();
        assert!(again.expires_at.unwrap() <= shortened + ChronoDuration::seconds(1));
    }

    #[tokio::test]
    async fn premium_owner_is_never_shortened() {
        let fx = fixture().await;
        let file = seed_file(&fx, Role::Premium, None).await;
        for i in 0..10 {
            fx.service
                .download(&file.id, None, &format!("10.0.0.{}", i), None)
                .await
                .unwrap();
        }
        let updated = fx.repos.files.get(&file.id).await.unwrap().unwrap();
        assert_eq!(updated.expires_at, None);
        assert_eq!(updated.downloads, 10);
    }

    #[tokio::test]
    async fn ip_set_is_bounded_but_downloads_keep_counting() {
        let fx = fixture().await;
        let mut cfg = LifecycleConfig::default();
        cfg.unique_ip_cap = 3;
        let service = DownloadService::new(fx.storage.clone(), fx.repos.clone(), cfg);
        let file = seed_file(&fx, Role::Premium, None).await;

        for i in 0..6 {
            service.download(&file.id, None, &format!("10.1.0.{}", i), None).await.unwrap();
        }
        let updated = fx.repos.files.get(&file.id).await.unwrap().unwrap();
        assert_eq!(updated.unique_download_ips.len(), 3);
        assert_eq!(updated.downloads, 6);
        assert!(updated.downloads >= updated.unique_download_ips.len() as u64);
    }

    #[tokio::test]
    async fn range_requests_pass_through() {
        let fx = fixture().await;
        let file = seed_file(&fx, Role::Premium, None).await;
        let range = ByteRange { start: 2, end: Some(5) };
        let dl = fx.service.download(&file.id, None, "1.1.1.1", Some(range)).await.unwrap();
        assert_eq!(dl.meta.content_length, 4);
        assert_eq!(dl.meta.range, Some((2, 5)));
        assert_eq!(body_of(dl).await, b"2345");
    }

    #[tokio::test]
    async fn range_past_end_is_not_satisfiable() {
        let fx = fixture().await;
        let file = seed_file(&fx, Role::Premium, None).await;
        let range = ByteRange { start: 10, end: None };
        let err = fx.service.download(&file.id, None, "1.1.1.1", Some(range)).await.unwrap_err();
        assert!(matches!(err, ServiceError::RangeNotSatisfiable { size: 10 }));
    }

    #[tokio::test]
    async fn expired_file_is_not_found() {
        let fx = fixture().await;
        let file = seed_file(&fx, Role::Free, Some(-1)).await;
        let err = fx.service.download(&file.id, None, "1.1.1.1", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        let err = fx.service.info(&file.id, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
