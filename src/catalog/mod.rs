//! Catalog
//!
//! Owner-facing organization of files and folders. The folder tree stores
//! only parent references as truth; the materialized `path` is recomputed
//! for a whole subtree by a single writer whenever a folder moves or is
//! renamed, so readers never see a half-rewritten chain. Restricted
//! accounts keep read access to their own content but lose every mutation.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{ServiceError, ServiceResult};
use crate::metadata::Repositories;
use crate::models::{AccountStatus, FileRecord, Folder, Principal};
use crate::quota::QuotaLedger;
use crate::storage::StorageProvider;

/// Folder tree and owner file operations
pub struct Catalog {
    storage: Arc<dyn StorageProvider>,
    repos: Repositories,
    quota: Arc<QuotaLedger>,
    /// Serializes every subtree path rewrite
    tree_writer: Mutex<()>,
}

impl Catalog {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        repos: Repositories,
        quota: Arc<QuotaLedger>,
    ) -> Self {
        Self { storage, repos, quota, tree_writer: Mutex::new(()) }
    }

    fn require_writable(principal: &Principal) -> ServiceResult<()> {
        match principal.status {
            AccountStatus::Active => Ok(()),
            AccountStatus::Restricted => {
                Err(ServiceError::forbidden("restricted accounts are read-only"))
            }
            AccountStatus::Blocked => Err(ServiceError::forbidden("account is blocked")),
        }
    }

    async fn owned_folder(&self, principal: &Principal, folder_id: &str) -> ServiceResult<Folder> {
        let folder = self
            .repos
            .folders
            .get(folder_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("folder"))?;
        if folder.user_id != principal.user_id && !principal.is_admin() {
            return Err(ServiceError::forbidden("folder belongs to another user"));
        }
        Ok(folder)
    }

    async fn owned_file(&self, principal: &Principal, file_id: &str) -> ServiceResult<FileRecord> {
        let file = self
            .repos
            .files
            .get(file_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("file"))?;
        if file.is_deleted {
            return Err(ServiceError::not_found("file"));
        }
        if file.user_id != principal.user_id && !principal.is_admin() {
            return Err(ServiceError::forbidden("file belongs to another user"));
        }
        Ok(file)
    }

    fn validate_name(name: &str) -> ServiceResult<&str> {
        let name = name.trim();
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(ServiceError::validation("invalid folder name"));
        }
        Ok(name)
    }

    // ------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------

    pub async fn create_folder(
        &self,
        principal: &Principal,
        name: &str,
        parent_id: Option<&str>,
    ) -> ServiceResult<Folder> {
        Self::require_writable(principal)?;
        let name = Self::validate_name(name)?;

        let folder = match parent_id {
            None => Folder::new(&principal.user_id, name),
            Some(parent_id) => {
                let parent = self.owned_folder(principal, parent_id).await?;
                Folder::child_of(&parent, name)
            }
        };
        let siblings = self.repos.folders.children(&principal.user_id, parent_id).await?;
        if siblings.iter().any(|s| s.name == name) {
            return Err(ServiceError::conflict("a sibling folder already has that name"));
        }

        self.repos.folders.put(&folder).await?;
        self.quota.get_or_create(&principal.user_id, principal.role, None).await?;
        self.quota.add_folder(&principal.user_id).await?;
        info!(folder = %folder.id, user = %principal.user_id, "folder created");
        Ok(folder)
    }

    pub async fn rename_folder(
        &self,
        principal: &Principal,
        folder_id: &str,
        new_name: &str,
    ) -> ServiceResult<Folder> {
        Self::require_writable(principal)?;
        let new_name = Self::validate_name(new_name)?;
        let folder = self.owned_folder(principal, folder_id).await?;

        let _writer = self.tree_writer.lock().await;
        let parent_path = match &folder.parent_id {
            None => String::new(),
            Some(pid) => self.owned_folder(principal, pid).await?.path,
        };
        let new_path = format!("{}/{}", parent_path, new_name);
        self.rewrite_subtree(&folder, new_path.clone()).await?;
        let (renamed, _) = self
            .repos
            .folders
            .mutate(&folder.id, |f| {
                f.name = new_name.to_string();
                f.path = new_path.clone();
            })
            .await?
            .ok_or_else(|| ServiceError::not_found("folder"))?;
        Ok(renamed)
    }

    /// Re-parent a folder. The subtree's materialized paths follow in the
    /// same writer critical section; moving under self or a descendant is
    /// rejected.
    pub async fn move_folder(
        &self,
        principal: &Principal,
        folder_id: &str,
        new_parent_id: Option<&str>,
    ) -> ServiceResult<Folder> {
        Self::require_writable(principal)?;
        let folder = self.owned_folder(principal, folder_id).await?;

        let _writer = self.tree_writer.lock().await;
        let new_parent = match new_parent_id {
            None => None,
            Some(pid) => Some(self.owned_folder(principal, pid).await?),
        };
        if let Some(parent) = &new_parent {
            if parent.id == folder.id
                || parent.path == folder.path
                || parent.path.starts_with(&format!("{}/", folder.path))
            {
                return Err(ServiceError::validation("cannot move a folder into its own subtree"));
            }
        }

        let new_path = match &new_parent {
            None => format!("/{}", folder.name),
            Some(parent) => format!("{}/{}", parent.path, folder.name),
        };
        self.rewrite_subtree(&folder, new_path.clone()).await?;
        let new_parent_owned = new_parent.map(|p| p.id);
        let (moved, _) = self
            .repos
            .folders
            .mutate(&folder.id, |f| {
                f.parent_id = new_parent_owned.clone();
                f.path = new_path.clone();
            })
            .await?
            .ok_or_else(|| ServiceError::not_found("folder"))?;
        info!(folder = %moved.id, path = %moved.path, "folder moved");
        Ok(moved)
    }

    /// Delete an empty folder
    pub async fn delete_folder(&self, principal: &Principal, folder_id: &str) -> ServiceResult<()> {
        Self::require_writable(principal)?;
        let folder = self.owned_folder(principal, folder_id).await?;

        let children = self.repos.folders.children(&folder.user_id, Some(&folder.id)).await?;
        if !children.is_empty() {
            return Err(ServiceError::conflict("folder still contains subfolders"));
        }
        let files = self.repos.files.list_by_folder(&folder.user_id, Some(&folder.id)).await?;
        if !files.is_empty() {
            return Err(ServiceError::conflict("folder still contains files"));
        }

        if self.repos.folders.remove(&folder.id).await? {
            self.quota.remove_folder(&folder.user_id).await?;
        }
        Ok(())
    }

    pub async fn list_folders(
        &self,
        principal: &Principal,
        parent_id: Option<&str>,
    ) -> ServiceResult<Vec<Folder>> {
        if let Some(pid) = parent_id {
            self.owned_folder(principal, pid).await?;
        }
        let mut folders = self.repos.folders.children(&principal.user_id, parent_id).await?;
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }

    /// Rewrite the materialized paths of every descendant when the root of
    /// the subtree takes `new_path`
    async fn rewrite_subtree(&self, root: &Folder, new_path: String) -> ServiceResult<()> {
        let old_prefix = format!("{}/", root.path);
        let new_prefix = format!("{}/", new_path);
        for descendant in self.repos.folders.list_by_user(&root.user_id).await? {
            if let Some(rest) = descendant.path.strip_prefix(&old_prefix) {
                let rewritten = format!("{}{}", new_prefix, rest);
                self.repos
                    .folders
                    .mutate(&descendant.id, |f| f.path = rewritten.clone())
                    .await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    pub async fn list_files(
        &self,
        principal: &Principal,
        folder_id: Option<&str>,
    ) -> ServiceResult<Vec<FileRecord>> {
        if let Some(fid) = folder_id {
            self.owned_folder(principal, fid).await?;
        }
        let mut files = self.repos.files.list_by_folder(&principal.user_id, folder_id).await?;
        files.sort_by(|a, b| a.original_name.cmp(&b.original_name));
        Ok(files)
    }

    pub async fn rename_file(
        &self,
        principal: &Principal,
        file_id: &str,
        new_name: &str,
    ) -> ServiceResult<FileRecord> {
        Self::require_writable(principal)?;
        let new_name = Self::validate_name(new_name)?.to_string();
        self.owned_file(principal, file_id).await?;
        let (renamed, _) = self
            .repos
            .files
            .mutate(file_id, |f| f.original_name = new_name.clone())
            .await?
            .ok_or_else(|| ServiceError::not_found("file"))?;
        Ok(renamed)
    }

    pub async fn move_file(
        &self,
        principal: &Principal,
        file_id: &str,
        folder_id: Option<&str>,
    ) -> ServiceResult<FileRecord> {
        Self::require_writable(principal)?;
        self.owned_file(principal, file_id).await?;
        if let Some(fid) = folder_id {
            self.owned_folder(principal, fid).await?;
        }
        let target = folder_id.map(str::to_string);
        let (moved, _) = self
            .repos
            .files
            .mutate(file_id, |f| f.folder_id = target.clone())
            .await?
            .ok_or_else(|| ServiceError::not_found("file"))?;
        Ok(moved)
    }

    /// Owner soft delete: object released, record kept for the grace
    /// window, ledger decremented once
    pub async fn delete_file(&self, principal: &Principal, file_id: &str) -> ServiceResult<()> {
        Self::require_writable(principal)?;
        let file = self.owned_file(principal, file_id).await?;
        crate::lifecycle::retire_file(&self.storage, &self.repos, &self.quota, &file, Utc::now())
            .await?;
        info!(file = %file_id, user = %principal.user_id, "file deleted by owner");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QuotaDefaults, UploadConfig};
    use crate::metadata::MemoryStore;
    use crate::models::Role;
    use crate::storage::MemoryStorage;

    fn principal() -> Principal {
        Principal::new("u1", Role::Free, AccountStatus::Active)
    }

    fn catalog() -> Catalog {
        let store = Arc::new(MemoryStore::new());
        let repos = Repositories::new(store.clone());
        let quota = Arc::new(QuotaLedger::new(
            store,
            QuotaDefaults::default(),
            &UploadConfig::default(),
        ));
        Catalog::new(Arc::new(MemoryStorage::new()), repos, quota)
    }

    #[tokio::test]
    async fn nested_folders_materialize_paths() {
        let cat = catalog();
        let p = principal();
        let root = cat.create_folder(&p, "projects", None).await.unwrap();
        let child = cat.create_folder(&p, "2026", Some(&root.id)).await.unwrap();
        assert_eq!(child.path, "/projects/2026");

        let quota = cat.quota.get("u1").await.unwrap().unwrap();
        assert_eq!(quota.usage.folder_count, 2);
    }

    #[tokio::test]
    async fn duplicate_sibling_names_conflict() {
        let cat = catalog();
        let p = principal();
        cat.create_folder(&p, "docs", None).await.unwrap();
        let err = cat.create_folder(&p, "docs", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn move_rewrites_descendant_paths() {
        let cat = catalog();
        let p = principal();
        let a = cat.create_folder(&p, "a", None).await.unwrap();
        let b = cat.create_folder(&p, "b", None).await.unwrap();
        let sub = cat.create_folder(&p, "sub", Some(&a.id)).await.unwrap();
        let leaf = cat.create_folder(&p, "leaf", Some(&sub.id)).await.unwrap();

        cat.move_folder(&p, &a.id, Some(&b.id)).await.unwrap();

        let sub = cat.repos.folders.get(&sub.id).await.unwrap().unwrap();
        let leaf = cat.repos.folders.get(&leaf.id).await.unwrap().unwrap();
        assert_eq!(sub.path, "/b/a/sub");
        assert_eq!(leaf.path, "/b/a/sub/leaf");
    }

    #[tokio::test]
    async fn cycles_are_rejected() {
        let cat = catalog();
        let p = principal();
        let a = cat.create_folder(&p, "a", None).await.unwrap();
        let sub = cat.create_folder(&p, "sub", Some(&a.id)).await.unwrap();

        let err = cat.move_folder(&p, &a.id, Some(&sub.id)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        let err = cat.move_folder(&p, &a.id, Some(&a.id)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_requires_empty_folder() {
        let cat = catalog();
        let p = principal();
        let a = cat.create_folder(&p, "a", None).await.unwrap();
        cat.create_folder(&p, "sub", Some(&a.id)).await.unwrap();

        let err = cat.delete_folder(&p, &a.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn restricted_accounts_cannot_mutate() {
        let cat = catalog();
        let restricted = Principal::new("u1", Role::Free, AccountStatus::Restricted);
        let err = cat.create_folder(&restricted, "x", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Authorization(_)));
    }

    #[tokio::test]
    async fn foreign_folders_are_invisible_to_mutation() {
        let cat = catalog();
        let p = principal();
        let folder = cat.create_folder(&p, "mine", None).await.unwrap();

        let other = Principal::new("u2", Role::Free, AccountStatus::Active);
        let err = cat.rename_folder(&other, &folder.id, "stolen").await.unwrap_err();
        assert!(matches!(err, ServiceError::Authorization(_)));
    }
}
