//! Proxied upload variant
//!
//! Chunks PUT through the server land at `temp/{session}/chunk_{index}`
//! with overwrite semantics, so every client retry of a `(session, index)`
//! pair is safe. `complete` assembles server-side and hands off to the
//! shared finalization.

use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{Principal, SessionStatus, UploadVariant};
use crate::storage::{key, StorageTier, StoredObject};

use super::{
    ChunkReceipt, CompleteResponse, FinalizeEntry, InitRequest, InitResponse, UploadManager,
};

impl UploadManager {
    /// Open a proxied upload session
    pub async fn init(
        &self,
        principal: &Principal,
        req: InitRequest,
    ) -> ServiceResult<InitResponse> {
        let mime = self.admit_init(principal, &req).await?;
        let chunk_size = self.upload_cfg.chunk_size.max(1);
        let session = self.new_session(
            principal,
            &req,
            mime,
            chunk_size,
            UploadVariant::Proxied,
            SessionStatus::Uploading,
        )?;
        self.repos.sessions.put(&session).await?;
        info!(
            session = %session.session_id,
            user = %principal.user_id,
            size = req.size,
            chunks = session.total_chunks,
            "proxied upload session opened"
        );
        Ok(InitResponse {
            session_id: session.session_id,
            chunk_size,
            total_chunks: session.total_chunks,
            expires_at: session.expires_at,
        })
    }

    /// Store one chunk. Chunks may arrive in any order and in parallel;
    /// the index joins `uploaded_chunks` only after the bytes are durable.
    pub async fn put_chunk(
        &self,
        principal: &Principal,
        session_id: &str,
        index: u32,
        data: Bytes,
        chunk_hash: Option<&str>,
    ) -> ServiceResult<ChunkReceipt> {
        let session = self.owned_session(principal, session_id).await?;
        if !matches!(session.variant, UploadVariant::Proxied) {
            return Err(ServiceError::validation("session is not a proxied upload"));
        }
        match session.status {
            SessionStatus::Uploading => {}
            SessionStatus::Completing | SessionStatus::Completed => {
                return Err(ServiceError::conflict("upload is already finalizing"))
            }
            other => {
                return Err(ServiceError::conflict(format!("session is {:?}", other)));
            }
        }
        if session.is_expired(Utc::now()) {
            return Err(ServiceError::conflict("session expired"));
        }
        if index >= session.total_chunks {
            return Err(ServiceError::validation(format!(
                "chunk index {} out of range (0..{})",
                index, session.total_chunks
            )));
        }
        let expected = session.expected_chunk_len(index);
        if data.len() as u64 != expected {
            return Err(ServiceError::validation(format!(
                "chunk {} must be {} bytes, got {}",
                index,
                expected,
                data.len()
            )));
        }
        if let Some(given) = chunk_hash {
            let actual = hex::encode(Sha256::digest(&data));
            if !actual.eq_ignore_ascii_case(given.trim()) {
                return Err(ServiceError::validation(format!("chunk {} hash mismatch", index)));
            }
        }

        self.storage.write_chunk(session_id, index, data).await?;

        // The index joins the set atomically, and only while the session is
        // still accepting chunks; an abort that raced the write leaves the
        // chunk for the GC sweep.
        let (updated, accepted) = self
            .repos
            .sessions
            .mutate(session_id, |s| {
                if s.status == SessionStatus::Uploading {
                    s.uploaded_chunks.insert(index);
                    true
                } else {
                    false
                }
            })
            .await?
            .ok_or_else(|| ServiceError::not_found("session"))?;
        if !accepted {
            return Err(ServiceError::conflict("session stopped accepting chunks"));
        }

        Ok(ChunkReceipt {
            uploaded_chunks: updated.uploaded_chunks.len(),
            total_chunks: updated.total_chunks,
            progress: updated.progress_percent(),
        })
    }

    /// Assemble and finalize. Requires the full chunk set; concurrent calls
    /// are rejected, crash-recovery re-entry from `Completing` is safe, and
    /// a repeat call on a completed session returns the existing file.
    pub async fn complete(
        &self,
        principal: &Principal,
        session_id: &str,
    ) -> ServiceResult<CompleteResponse> {
        let session = self.owned_session(principal, session_id).await?;
        if !matches!(session.variant, UploadVariant::Proxied) {
            return Err(ServiceError::validation("session is not a proxied upload"));
        }

        let _guard = self.finalize_guard(session_id)?;
        let result = self.complete_locked(session_id).await;
        // The entry always leaves the map; the next caller starts over with
        // a fresh lock. Dropping it while our guard is live is fine, the
        // guarded work is already done.
        self.release_finalize_lock(session_id);
        result
    }

    async fn complete_locked(&self, session_id: &str) -> ServiceResult<CompleteResponse> {
        let (session, entry) = self.begin_finalize(session_id, true).await?;
        match entry {
            FinalizeEntry::Started | FinalizeEntry::Reentry => {}
            FinalizeEntry::AlreadyCompleted(file_id) => {
                return self.completed_response(file_id);
            }
            FinalizeEntry::MissingChunks(missing) => {
                return Err(ServiceError::validation(format!(
                    "cannot complete, missing chunks {:?}",
                    missing
                )));
            }
            FinalizeEntry::Terminal(status) => {
                return Err(ServiceError::conflict(format!("session is {:?}", status)));
            }
        }

        // A crash may have lost the session update after a successful
        // assembly; detect the finished object instead of re-assembling
        // from chunks that are already gone.
        let stored = match self.storage.metadata(&session.storage_key, StorageTier::Hot).await {
            Ok(meta) if meta.size == session.total_size => StoredObject {
                key: key::qualify(&session.storage_key, StorageTier::Hot),
                tier: StorageTier::Hot,
                size: meta.size,
            },
            _ => {
                self.storage
                    .assemble(
                        &session.session_id,
                        &session.storage_key,
                        session.total_chunks,
                        StorageTier::Hot,
                    )
                    .await?
            }
        };

        let hash = session.client_hash.clone();
        self.finalize(&session, stored, hash).await
    }

    /// Abort either variant: release staged storage, mark the session
    /// aborted. Repeat aborts are no-op successes.
    pub async fn abort(&self, principal: &Principal, session_id: &str) -> ServiceResult<()> {
        let session = self.owned_session(principal, session_id).await?;
        match session.status {
            SessionStatus::Completed => {
                return Err(ServiceError::conflict("cannot abort a completed upload"))
            }
            SessionStatus::Aborted | SessionStatus::Failed => return Ok(()),
            _ => {}
        }

        match &session.variant {
            UploadVariant::Proxied => self.storage.delete_chunks(session_id).await?,
            UploadVariant::Direct { multipart_upload_id } => {
                self.storage.abort_multipart(&session.storage_key, multipart_upload_id).await?
            }
        }
        self.repos
            .sessions
            .mutate(session_id, |s| {
                if s.status != SessionStatus::Completed {
                    s.status = SessionStatus::Aborted;
                }
            })
            .await?;
        info!(session = %session_id, "upload session aborted");
        Ok(())
    }

    fn completed_response(&self, file_id: Option<String>) -> ServiceResult<CompleteResponse> {
        let file_id =
            file_id.ok_or_else(|| ServiceError::internal("completed session lost its file id"))?;
        Ok(CompleteResponse {
            download_url: format!("{}/api/download/{}", self.public_base_url, file_id),
            file_id,
        })
    }
}
