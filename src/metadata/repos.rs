//! Typed repositories
//!
//! Entity-aware wrappers over the document engine. Query helpers are
//! batch-limited full scans; with an embedded store and worker batch sizes
//! around a hundred, the scan is the index. Items missed by a batch are
//! picked up on the next worker cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::{FileRecord, Folder, SessionStatus, UploadSession, User};
use crate::storage::StorageTier;

use super::{collections, Collection, DocumentStore, MetaResult};

/// All typed repositories over one document store
#[derive(Clone)]
pub struct Repositories {
    pub users: UserRepo,
    pub files: FileRepo,
    pub folders: FolderRepo,
    pub sessions: SessionRepo,
}

impl Repositories {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            users: UserRepo { col: Collection::new(Arc::clone(&store), collections::USERS) },
            files: FileRepo { col: Collection::new(Arc::clone(&store), collections::FILES) },
            folders: FolderRepo { col: Collection::new(Arc::clone(&store), collections::FOLDERS) },
            sessions: SessionRepo { col: Collection::new(store, collections::SESSIONS) },
        }
    }
}

// ============================================================================
// Users
// ============================================================================

#[derive(Clone)]
pub struct UserRepo {
    col: Collection<User>,
}

impl UserRepo {
    pub async fn get(&self, id: &str) -> MetaResult<Option<User>> {
        self.col.get(id).await
    }

    pub async fn put(&self, user: &User) -> MetaResult<()> {
        self.col.put(&user.id, user).await
    }

    pub async fn mutate<R, F>(&self, id: &str, f: F) -> MetaResult<Option<(User, R)>>
    where
        F: FnMut(&mut User) -> R + Send,
        R: Send,
    {
        self.col.mutate(id, f).await
    }

    /// Premium users whose subscription has lapsed; admins never qualify
    pub async fn lapsed_premium(&self, now: DateTime<Utc>, batch: usize) -> MetaResult<Vec<User>> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|u| u.premium_lapsed(now))
            .take(batch)
            .collect())
    }
}

// ============================================================================
// Files
// ============================================================================

#[derive(Clone)]
pub struct FileRepo {
    col: Collection<FileRecord>,
}

impl FileRepo {
    pub async fn get(&self, id: &str) -> MetaResult<Option<FileRecord>> {
        self.col.get(id).await
    }

    pub async fn insert(&self, file: &FileRecord) -> MetaResult<()> {
        self.col.put(&file.id, file).await
    }

    pub async fn mutate<R, F>(&self, id: &str, f: F) -> MetaResult<Option<(FileRecord, R)>>
    where
        F: FnMut(&mut FileRecord) -> R + Send,
        R: Send,
    {
        self.col.mutate(id, f).await
    }

    pub async fn remove(&self, id: &str) -> MetaResult<bool> {
        self.col.remove(id).await
    }

    /// At-most-one lookup by storage key; completion retries rely on this
    pub async fn find_by_storage_key(&self, key: &str) -> MetaResult<Option<FileRecord>> {
        Ok(self.col.scan().await?.into_iter().find(|f| f.storage_key == key))
    }

    pub async fn list_by_user(&self, user_id: &str) -> MetaResult<Vec<FileRecord>> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|f| f.user_id == user_id)
            .collect())
    }

    pub async fn list_by_folder(
        &self,
        user_id: &str,
        folder_id: Option<&str>,
    ) -> MetaResult<Vec<FileRecord>> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|f| {
                f.user_id == user_id && !f.is_deleted && f.folder_id.as_deref() == folder_id
            })
            .collect())
    }

    /// Live files past their expiry
    pub async fn expired(&self, now: DateTime<Utc>, batch: usize) -> MetaResult<Vec<FileRecord>> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|f| !f.is_deleted && f.is_expired(now))
            .take(batch)
            .collect())
    }

    /// Live files untouched since `cutoff`
    pub async fn inactive(
        &self,
        cutoff: DateTime<Utc>,
        batch: usize,
    ) -> MetaResult<Vec<FileRecord>> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|f| !f.is_deleted && f.last_access_at <= cutoff)
            .take(batch)
            .collect())
    }

    /// Soft-deleted records whose grace period ended before `cutoff`
    pub async fn soft_deleted_before(
        &self,
        cutoff: DateTime<Utc>,
        batch: usize,
    ) -> MetaResult<Vec<FileRecord>> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|f| f.is_deleted && matches!(f.deleted_at, Some(t) if t <= cutoff))
            .take(batch)
            .collect())
    }

    /// Live files on `tier`, optionally only those idle since `idle_cutoff`
    pub async fn on_tier(
        &self,
        tier: StorageTier,
        idle_cutoff: Option<DateTime<Utc>>,
        batch: usize,
    ) -> MetaResult<Vec<FileRecord>> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|f| {
                !f.is_deleted
                    && f.storage_tier == tier
                    && idle_cutoff.map_or(true, |cutoff| f.last_access_at <= cutoff)
            })
            .take(batch)
            .collect())
    }

    /// Live files of users whose role grants no expiry but lost it
    pub async fn live_unexpiring_by_user(&self, user_id: &str) -> MetaResult<Vec<FileRecord>> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|f| f.user_id == user_id && !f.is_deleted && f.expires_at.is_none())
            .collect())
    }

    /// Sum of live bytes per user; the ledger invariant check
    pub async fn live_bytes_of(&self, user_id: &str) -> MetaResult<u64> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|f| f.user_id == user_id && !f.is_deleted)
            .map(|f| f.size)
            .sum())
    }
}

// ============================================================================
// Folders
// ============================================================================

#[derive(Clone)]
pub struct FolderRepo {
    col: Collection<Folder>,
}

impl FolderRepo {
    pub async fn get(&self, id: &str) -> MetaResult<Option<Folder>> {
        self.col.get(id).await
    }

    pub async fn put(&self, folder: &Folder) -> MetaResult<()> {
        self.col.put(&folder.id, folder).await
    }

    pub async fn mutate<R, F>(&self, id: &str, f: F) -> MetaResult<Option<(Folder, R)>>
    where
        F: FnMut(&mut Folder) -> R + Send,
        R: Send,
    {
        self.col.mutate(id, f).await
    }

    pub async fn remove(&self, id: &str) -> MetaResult<bool> {
        self.col.remove(id).await
    }

    pub async fn list_by_user(&self, user_id: &str) -> MetaResult<Vec<Folder>> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|f| f.user_id == user_id)
            .collect())
    }

    pub async fn children(&self, user_id: &str, parent_id: Option<&str>) -> MetaResult<Vec<Folder>> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|f| f.user_id == user_id && f.parent_id.as_deref() == parent_id)
            .collect())
    }
}

// ============================================================================
// Upload sessions
// ============================================================================

#[derive(Clone)]
pub struct SessionRepo {
    col: Collection<UploadSession>,
}

impl SessionRepo {
    pub async fn get(&self, id: &str) -> MetaResult<Option<UploadSession>> {
        self.col.get(id).await
    }

    pub async fn put(&self, session: &UploadSession) -> MetaResult<()> {
        self.col.put(&session.session_id, session).await
    }

    pub async fn mutate<R, F>(&self, id: &str, f: F) -> MetaResult<Option<(UploadSession, R)>>
    where
        F: FnMut(&mut UploadSession) -> R + Send,
        R: Send,
    {
        self.col.mutate(id, f).await
    }

    pub async fn remove(&self, id: &str) -> MetaResult<bool> {
        self.col.remove(id).await
    }

    /// Sessions past TTL that never completed; the GC sweep input
    pub async fn expired_incomplete(
        &self,
        now: DateTime<Utc>,
        batch: usize,
    ) -> MetaResult<Vec<UploadSession>> {
        Ok(self
            .col
            .scan()
            .await?
            .into_iter()
            .filter(|s| {
                s.is_expired(now)
                    && matches!(
                        s.status,
                        SessionStatus::Initializing
                            | SessionStatus::Uploading
                            | SessionStatus::Failed
                            | SessionStatus::Aborted
                    )
            })
            .take(batch)
            .collect())
    }
}
