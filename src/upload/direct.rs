//! Direct upload variant
//!
//! The server brokers a provider-native multipart upload: it mints the
//! upload, hands the client one presigned PUT URL per part, and finishes
//! the object on `complete`. Chunk bytes never touch this process. Only
//! providers that can presign part PUTs qualify; the local backend refuses
//! at init.

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{Principal, SessionStatus, UploadSession, UploadVariant};
use crate::storage::{CompletedPart, StorageTier, StoredObject};

use super::{CompleteResponse, FinalizeEntry, InitRequest, UploadManager};

/// Everything the client needs to drive the part PUTs itself
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectInitResponse {
    pub session_id: String,
    pub upload_id: String,
    /// Fully qualified destination key
    pub key: String,
    pub total_parts: u32,
    pub part_size: u64,
    /// One presigned PUT URL per part, index 0 = part 1
    pub presigned_urls: Vec<String>,
    /// Seconds of URL validity
    pub expires_in: u64,
}

/// Check a client-supplied part list against the expected count: part
/// numbers must run exactly `1..=expected` in ascending order, no
/// duplicates, no gaps, no empty etags. Returned parts have surrounding
/// ETag quotes stripped for the provider call.
pub fn validate_parts(parts: &[CompletedPart], expected: u32) -> ServiceResult<Vec<CompletedPart>> {
    if parts.len() as u32 != expected {
        return Err(ServiceError::validation(format!(
            "expected {} parts, got {}",
            expected,
            parts.len()
        )));
    }
    let mut cleaned = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        let want = i as u32 + 1;
        if part.part_number != want {
            return Err(ServiceError::validation(format!(
                "parts must be ascending without gaps: position {} holds part {}",
                i, part.part_number
            )));
        }
        let etag = part.etag.trim().trim_matches('"').to_string();
        if etag.is_empty() {
            return Err(ServiceError::validation(format!("part {} has an empty etag", want)));
        }
        cleaned.push(CompletedPart { part_number: want, etag });
    }
    Ok(cleaned)
}

impl UploadManager {
    /// Open a direct upload session and presign every part PUT
    pub async fn init_direct(
        &self,
        principal: &Principal,
        req: InitRequest,
    ) -> ServiceResult<DirectInitResponse> {
        let mime = self.admit_init(principal, &req).await?;
        if !self.storage.supports_presigned_uploads() {
            return Err(ServiceError::validation(
                "direct uploads are not available on this storage backend",
            ));
        }

        let part_size =
            self.upload_cfg.part_size.max(crate::config::UploadConfig::MIN_PART_SIZE);
        // An empty file still carries one (empty) part; multipart uploads
        // cannot complete with zero parts.
        let total_parts = UploadSession::chunk_count(req.size, part_size).max(1);

        let mut session = self.new_session(
            principal,
            &req,
            mime,
            part_size,
            UploadVariant::Direct { multipart_upload_id: String::new() },
            SessionStatus::Initializing,
        )?;
        session.total_chunks = total_parts;
        self.repos.sessions.put(&session).await?;

        let init = match self.storage.init_multipart(&session.storage_key, StorageTier::Hot).await
        {
            Ok(init) => init,
            Err(e) => {
                self.repos
                    .sessions
                    .mutate(&session.session_id, |s| s.status = SessionStatus::Failed)
                    .await?;
                return Err(e.into());
            }
        };

        let ttl = self.upload_cfg.presigned_expiry;
        let mut presigned_urls = Vec::with_capacity(total_parts as usize);
        for part_number in 1..=total_parts {
            presigned_urls.push(
                self.storage.sign_part_upload(&init.key, &init.upload_id, part_number, ttl).await?,
            );
        }

        let upload_id = init.upload_id.clone();
        let key = init.key.clone();
        self.repos
            .sessions
            .mutate(&session.session_id, |s| {
                s.storage_key = key.clone();
                s.variant = UploadVariant::Direct { multipart_upload_id: upload_id.clone() };
                s.status = SessionStatus::Uploading;
            })
            .await?;

        info!(
            session = %session.session_id,
            user = %principal.user_id,
            parts = total_parts,
            "direct upload session opened"
        );
        Ok(DirectInitResponse {
            session_id: session.session_id,
            upload_id: init.upload_id,
            key: init.key,
            total_parts,
            part_size,
            presigned_urls,
            expires_in: ttl.as_secs(),
        })
    }

    /// Validate the part list and finish the multipart upload, then run the
    /// shared finalization. Same serialization and re-entry rules as the
    /// proxied `complete`.
    pub async fn complete_direct(
        &self,
        principal: &Principal,
        session_id: &str,
        parts: Vec<CompletedPart>,
    ) -> ServiceResult<CompleteResponse> {
        let session = self.owned_session(principal, session_id).await?;
        let upload_id = match &session.variant {
            UploadVariant::Direct { multipart_upload_id } => multipart_upload_id.clone(),
            UploadVariant::Proxied => {
                return Err(ServiceError::validation("session is not a direct upload"))
            }
        };
        if session.is_expired(Utc::now()) && session.status == SessionStatus::Uploading {
            return Err(ServiceError::conflict("session expired"));
        }

        let _guard = self.finalize_guard(session_id)?;
        let result = self.complete_direct_locked(session_id, upload_id, parts).await;
        self.release_finalize_lock(session_id);
        result
    }

    async fn complete_direct_locked(
        &self,
        session_id: &str,
        upload_id: String,
        parts: Vec<CompletedPart>,
    ) -> ServiceResult<CompleteResponse> {
        let (session, entry) = self.begin_finalize(session_id, false).await?;
        match entry {
            FinalizeEntry::Started | FinalizeEntry::Reentry => {}
            FinalizeEntry::AlreadyCompleted(file_id) => {
                let file_id = file_id
                    .ok_or_else(|| ServiceError::internal("completed session lost its file id"))?;
                return Ok(CompleteResponse {
                    download_url: format!("{}/api/download/{}", self.public_base_url, file_id),
                    file_id,
                });
            }
            FinalizeEntry::MissingChunks(_) => {
                return Err(ServiceError::internal("direct sessions have no chunk set"))
            }
            FinalizeEntry::Terminal(status) => {
                return Err(ServiceError::conflict(format!("session is {:?}", status)));
            }
        }

        let validated = validate_parts(&parts, session.total_chunks)?;

        // Crash recovery: the multipart may already have completed before
        // the session update was lost.
        let stored = match self.storage.metadata(&session.storage_key, StorageTier::Hot).await {
            Ok(meta) if meta.size == session.total_size => StoredObject {
                key: session.storage_key.clone(),
                tier: StorageTier::Hot,
                size: meta.size,
            },
            _ => {
                self.storage
                    .complete_multipart(&session.storage_key, &upload_id, &validated)
                    .await?
            }
        };

        let hash = session.client_hash.clone();
        self.finalize(&session, stored, hash).await
    }

    /// Abort the multipart upload; repeat calls are no-op successes
    pub async fn abort_direct(&self, principal: &Principal, session_id: &str) -> ServiceResult<()> {
        self.abort(principal, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(n: u32, etag: &str) -> CompletedPart {
        CompletedPart { part_number: n, etag: etag.to_string() }
    }

    #[test]
    fn sorted_parts_pass() {
        let parts = vec![part(1, "\"a\""), part(2, "b"), part(3, "c")];
        let cleaned = validate_parts(&parts, 3).unwrap();
        assert_eq!(cleaned[0].etag, "a");
        assert_eq!(cleaned[2].part_number, 3);
    }

    #[test]
    fn out_of_order_parts_fail() {
        let parts = vec![part(2, "b"), part(1, "a")];
        assert!(matches!(
            validate_parts(&parts, 2),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn gaps_and_duplicates_fail() {
        assert!(validate_parts(&[part(1, "a"), part(3, "c")], 2).is_err());
        assert!(validate_parts(&[part(1, "a"), part(1, "a")], 2).is_err());
    }

    #[test]
    fn count_mismatch_fails() {
        assert!(validate_parts(&[part(1, "a")], 2).is_err());
        assert!(validate_parts(&[part(1, "a"), part(2, "b")], 1).is_err());
    }

    #[test]
    fn empty_etag_fails() {
        assert!(validate_parts(&[part(1, "\"\"")], 1).is_err());
    }
}
