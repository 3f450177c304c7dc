//! Upload session manager
//!
//! Drives a file from `init` to `complete` across both protocol variants
//! with resumable semantics:
//! - proxied: server-mediated chunk PUTs staged at temp keys, assembled
//!   server-side (`proxied` module)
//! - direct: presigned multipart straight to the object store (`direct`
//!   module)
//!
//! Everything after the bytes land is shared: `finalize` re-checks quota
//! authoritatively, creates the file record at most once, increments the
//! ledger, and seals the session. Finalization is serialized per session:
//! an in-process guard admits one `complete` at a time and concurrent
//! attempts get `Conflict`; re-entry after a crash resumes from the
//! `Completing` state idempotently.

mod direct;
mod proxied;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::{LifecycleConfig, UploadConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::metadata::Repositories;
use crate::models::{
    new_id, FileRecord, Principal, Role, SessionStatus, UploadSession, UploadVariant,
};
use crate::quota::QuotaLedger;
use crate::storage::{key, StorageProvider, StoredObject};

pub use direct::{validate_parts, DirectInitResponse};

/// Hard ceiling on chunk counts; a saner bound than whatever
/// `total_size / chunk_size` degenerates to on hostile input
const MAX_CHUNKS: u32 = 10_000;

// ============================================================================
// Requests and responses
// ============================================================================

/// Parameters for both init variants
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub filename: String,
    pub size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Optional whole-file SHA-256 the client already computed
    #[serde(default)]
    pub client_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub session_id: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub uploaded_chunks: usize,
    pub total_chunks: u32,
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub filename: String,
    pub status: SessionStatus,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub uploaded_chunks: Vec<u32>,
    pub progress: u8,
    pub file_id: Option<String>,
}

impl From<&UploadSession> for SessionView {
    fn from(s: &UploadSession) -> Self {
        Self {
            session_id: s.session_id.clone(),
            filename: s.filename.clone(),
            status: s.status,
            total_size: s.total_size,
            chunk_size: s.chunk_size,
            total_chunks: s.total_chunks,
            uploaded_chunks: s.uploaded_chunks.iter().copied().collect(),
            progress: s.progress_percent(),
            file_id: s.file_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeView {
    pub session_id: String,
    pub missing_chunks: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub file_id: String,
    pub download_url: String,
}

// ============================================================================
// Manager
// ============================================================================

/// Owns session state, chunk bookkeeping, assembly, resumption, and abort
pub struct UploadManager {
    storage: Arc<dyn StorageProvider>,
    repos: Repositories,
    quota: Arc<QuotaLedger>,
    upload_cfg: UploadConfig,
    lifecycle_cfg: LifecycleConfig,
    public_base_url: String,
    finalize_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UploadManager {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        repos: Repositories,
        quota: Arc<QuotaLedger>,
        upload_cfg: UploadConfig,
        lifecycle_cfg: LifecycleConfig,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            repos,
            quota,
            upload_cfg,
            lifecycle_cfg,
            public_base_url: public_base_url.into(),
            finalize_locks: DashMap::new(),
        }
    }

    /// Shared init admission: standing, folder ownership, mime policy, and
    /// the advisory quota check. Returns the resolved mime type.
    pub(crate) async fn admit_init(
        &self,
        principal: &Principal,
        req: &InitRequest,
    ) -> ServiceResult<String> {
        if principal.status != crate::models::AccountStatus::Active {
            return Err(ServiceError::forbidden("account cannot upload"));
        }
        if req.filename.trim().is_empty() {
            return Err(ServiceError::validation("filename must not be empty"));
        }
        if let Some(folder_id) = &req.folder_id {
            let folder = self
                .repos
                .folders
                .get(folder_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("folder"))?;
            if folder.user_id != principal.user_id {
                return Err(ServiceError::forbidden("folder belongs to another user"));
            }
        }

        let mime = match &req.mime_type {
            Some(mime) if !mime.trim().is_empty() => mime.trim().to_string(),
            _ => mime_from_extension(&req.filename).to_string(),
        };
        if !self.upload_cfg.allowed_mime_types.is_empty()
            && !self.upload_cfg.allowed_mime_types.iter().any(|allowed| *allowed == mime)
        {
            return Err(ServiceError::validation(format!("mime type {} not allowed", mime)));
        }

        let user = self.repos.users.get(&principal.user_id).await?;
        let (role, quota_override) = match &user {
            Some(u) => (u.effective_role(Utc::now()), u.quota_override),
            None => (principal.role, None),
        };
        let admission =
            self.quota.can_upload(&principal.user_id, role, quota_override, req.size).await?;
        if !admission.allowed {
            return Err(ServiceError::validation(admission.reasons.join("; ")));
        }
        Ok(mime)
    }

    /// Session lookup bound to the caller
    pub(crate) async fn owned_session(
        &self,
        principal: &Principal,
        session_id: &str,
    ) -> ServiceResult<UploadSession> {
        let session = self
            .repos
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("session"))?;
        if session.user_id != principal.user_id && !principal.is_admin() {
            return Err(ServiceError::forbidden("session belongs to another user"));
        }
        Ok(session)
    }

    /// Progress and status view
    pub async fn status(&self, principal: &Principal, session_id: &str) -> ServiceResult<SessionView> {
        Ok(SessionView::from(&self.owned_session(principal, session_id).await?))
    }

    /// Chunks still missing, sorted ascending
    pub async fn resume(&self, principal: &Principal, session_id: &str) -> ServiceResult<ResumeView> {
        let session = self.owned_session(principal, session_id).await?;
        if session.status != SessionStatus::Uploading {
            return Err(ServiceError::conflict(format!(
                "session is {:?} and cannot accept chunks",
                session.status
            )));
        }
        Ok(ResumeView { session_id: session.session_id.clone(), missing_chunks: session.missing_chunks() })
    }

    /// One finalization in flight per session; others get `Conflict`
    pub(crate) fn finalize_guard(&self, session_id: &str) -> ServiceResult<OwnedMutexGuard<()>> {
        let lock = self
            .finalize_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.try_lock_owned()
            .map_err(|_| ServiceError::conflict("finalization already in progress"))
    }

    pub(crate) fn release_finalize_lock(&self, session_id: &str) {
        self.finalize_locks.remove(session_id);
    }

    /// Flip the session into `Completing`, or classify why it cannot.
    /// Returns the session and whether this call is a fresh start or a
    /// crash-recovery re-entry.
    pub(crate) async fn begin_finalize(
        &self,
        session_id: &str,
        require_full_chunk_set: bool,
    ) -> ServiceResult<(UploadSession, FinalizeEntry)> {
        let (session, outcome) = self
            .repos
            .sessions
            .mutate(session_id, |s| match s.status {
                SessionStatus::Completed => FinalizeEntry::AlreadyCompleted(s.file_id.clone()),
                SessionStatus::Completing => FinalizeEntry::Reentry,
                SessionStatus::Uploading => {
                    if require_full_chunk_set && !s.is_complete_set() {
                        FinalizeEntry::MissingChunks(s.missing_chunks())
                    } else {
                        s.status = SessionStatus::Completing;
                        FinalizeEntry::Started
                    }
                }
                other => FinalizeEntry::Terminal(other),
            })
            .await?
            .ok_or_else(|| ServiceError::not_found("session"))?;
        Ok((session, outcome))
    }

    /// Shared post-assembly finalization for both variants: expiry
    /// decision, authoritative quota re-check, at-most-once file record,
    /// ledger increment, session sealing.
    pub(crate) async fn finalize(
        &self,
        session: &UploadSession,
        stored: StoredObject,
        hash: Option<String>,
    ) -> ServiceResult<CompleteResponse> {
        let now = Utc::now();
        let user = self.repos.users.get(&session.user_id).await?;
        let (role, quota_override) = match &user {
            Some(u) => (u.effective_role(now), u.quota_override),
            None => (Role::Free, None),
        };

        // Admission at init was advisory; this check is the authoritative
        // one, taken against current usage.
        let admission = self
            .quota
            .can_upload(&session.user_id, role, quota_override, session.total_size)
            .await?;
        if !admission.allowed {
            warn!(
                session = %session.session_id,
                user = %session.user_id,
                "quota violated at finalization; dropping object"
            );
            self.storage.delete(&stored.key, stored.tier).await?;
            self.repos
                .sessions
                .mutate(&session.session_id, |s| s.status = SessionStatus::Failed)
                .await?;
            return Err(ServiceError::validation(admission.reasons.join("; ")));
        }

        let expires_at = match role {
            Role::Free => Some(now + ChronoDuration::days(self.lifecycle_cfg.expiry_days_free)),
            Role::Premium | Role::Admin => None,
        };

        // Claim the file id on the session first; retries after a crash then
        // converge on the same record instead of minting a second one.
        let (_, claim) = self
            .repos
            .sessions
            .mutate(&session.session_id, |s| match &s.file_id {
                Some(id) => id.clone(),
                None => {
                    let id = new_id();
                    s.file_id = Some(id.clone());
                    id
                }
            })
            .await?
            .ok_or_else(|| ServiceError::not_found("session"))?;

        if self.repos.files.get(&claim).await?.is_none() {
            let file = FileRecord {
                id: claim.clone(),
                user_id: session.user_id.clone(),
                folder_id: session.folder_id.clone(),
                original_name: key::sanitize_filename(&session.filename),
                mime_type: session.mime_type.clone(),
                size: stored.size,
                // The provider returned a fully qualified key; persist it
                // verbatim and never re-prefix.
                storage_key: stored.key.clone(),
                storage_tier: stored.tier,
                hash,
                downloads: 0,
                unique_download_ips: Vec::new(),
                last_access_at: now,
                expires_at,
                is_deleted: false,
                deleted_at: None,
                created_at: now,
            };
            self.repos.files.insert(&file).await?;
            self.quota.add_file(&session.user_id, stored.size).await?;
        }

        self.repos
            .sessions
            .mutate(&session.session_id, |s| {
                s.status = SessionStatus::Completed;
                // Seal the session with the object's real location.
                s.storage_key = stored.key.clone();
            })
            .await?;

        info!(
            session = %session.session_id,
            file = %claim,
            size = stored.size,
            "upload completed"
        );
        Ok(CompleteResponse {
            file_id: claim.clone(),
            download_url: format!("{}/api/download/{}", self.public_base_url, claim),
        })
    }

    /// New session skeleton shared by both variants
    pub(crate) fn new_session(
        &self,
        principal: &Principal,
        req: &InitRequest,
        mime: String,
        chunk_size: u64,
        variant: UploadVariant,
        status: SessionStatus,
    ) -> ServiceResult<UploadSession> {
        let total_chunks = UploadSession::chunk_count(req.size, chunk_size);
        if total_chunks > MAX_CHUNKS {
            return Err(ServiceError::validation(format!(
                "file would need {} chunks, limit is {}",
                total_chunks, MAX_CHUNKS
            )));
        }
        Ok(UploadSession {
            session_id: new_id(),
            user_id: principal.user_id.clone(),
            folder_id: req.folder_id.clone(),
            filename: req.filename.clone(),
            mime_type: mime,
            total_size: req.size,
            chunk_size,
            total_chunks,
            storage_key: key::object_key(&principal.user_id, &req.filename),
            variant,
            status,
            uploaded_chunks: BTreeSet::new(),
            client_hash: req.client_hash.clone(),
            file_id: None,
            expires_at: Utc::now()
                + ChronoDuration::from_std(self.upload_cfg.session_ttl)
                    .unwrap_or_else(|_| ChronoDuration::hours(24)),
            created_at: Utc::now(),
        })
    }

    // ------------------------------------------------------------------
    // Session garbage collection
    // ------------------------------------------------------------------

    /// Drop sessions past TTL that never completed, releasing their staged
    /// storage. Called by the lifecycle sweeper; errors on individual
    /// sessions are logged and retried next cycle.
    pub async fn gc_expired_sessions(&self, batch: usize) -> ServiceResult<usize> {
        let now = Utc::now();
        let stale = self.repos.sessions.expired_incomplete(now, batch).await?;
        let mut collected = 0;
        for session in stale {
            let released = match &session.variant {
                UploadVariant::Proxied => {
                    self.storage.delete_chunks(&session.session_id).await.map(|_| true)
                }
                UploadVariant::Direct { multipart_upload_id } => self
                    .storage
                    .abort_multipart(&session.storage_key, multipart_upload_id)
                    .await
                    .map(|_| true),
            };
            match released {
                Ok(_) => {
                    self.repos.sessions.remove(&session.session_id).await?;
                    self.release_finalize_lock(&session.session_id);
                    collected += 1;
                    debug!(session = %session.session_id, "collected expired upload session");
                }
                Err(e) => {
                    warn!(session = %session.session_id, error = %e, "session gc retry next cycle");
                }
            }
        }
        Ok(collected)
    }
}

/// How a `complete` call entered finalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FinalizeEntry {
    /// CAS `Uploading -> Completing` won by this call
    Started,
    /// Session was already `Completing`; crash-recovery re-entry
    Reentry,
    /// Nothing left to do; carries the linked file id
    AlreadyCompleted(Option<String>),
    /// Proxied completion requires the full chunk set first
    MissingChunks(Vec<u32>),
    /// Session is failed or aborted
    Terminal(SessionStatus),
}

/// Mime type from a filename extension; unknown extensions default to
/// octet-stream
pub fn mime_from_extension(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}
