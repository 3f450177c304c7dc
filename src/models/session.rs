//! Upload sessions

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session lifecycle.
///
/// ```text
/// Initializing -> Uploading -> Completing -> Completed
///                     |             |
///                     v             v
///                  Aborted       Failed
/// ```
///
/// Once `Completed` the session is immutable and a file record referencing
/// its storage key exists. `Completing` survives crashes: re-entering
/// `complete` from that state is allowed and idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initializing,
    Uploading,
    Completing,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    /// Whether the session can still make progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

/// Which upload protocol the session drives. Variant-specific fields live on
/// the variant, never loose on the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UploadVariant {
    /// Server-mediated chunk PUTs staged at temp keys
    Proxied,
    /// Presigned multipart straight to the object store
    Direct {
        /// Provider-issued multipart upload id
        multipart_upload_id: String,
    },
}

/// Resumable upload session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: String,
    pub user_id: String,
    pub folder_id: Option<String>,
    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    /// Chunk (proxied) or part (direct) size in bytes
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// Unqualified object key the finished file will live at
    pub storage_key: String,
    pub variant: UploadVariant,
    pub status: SessionStatus,
    /// Sparse set of chunk indices confirmed written (proxied only)
    pub uploaded_chunks: BTreeSet<u32>,
    /// Whole-file SHA-256 the client supplied at init, if any
    pub client_hash: Option<String>,
    /// File record created at completion
    pub file_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    /// Chunk count for a file of `total_size` split into `chunk_size` pieces;
    /// an empty file has zero chunks
    pub fn chunk_count(total_size: u64, chunk_size: u64) -> u32 {
        if total_size == 0 {
            0
        } else {
            total_size.div_ceil(chunk_size) as u32
        }
    }

    /// Expected byte length of chunk `index`; the last chunk carries the
    /// remainder, every other chunk is exactly `chunk_size`
    pub fn expected_chunk_len(&self, index: u32) -> u64 {
        if index + 1 == self.total_chunks {
            let rem = self.total_size % self.chunk_size;
            if rem == 0 { self.chunk_size } else { rem }
        } else {
            self.chunk_size
        }
    }

    /// Indices not yet confirmed, in ascending order
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.uploaded_chunks.contains(i))
            .collect()
    }

    /// Whether every chunk has been confirmed
    pub fn is_complete_set(&self) -> bool {
        self.uploaded_chunks.len() as u32 == self.total_chunks
    }

    /// Upload progress in [0, 100]
    pub fn progress_percent(&self) -> u8 {
        if self.total_chunks == 0 {
            100
        } else {
            ((self.uploaded_chunks.len() as f64 / self.total_chunks as f64) * 100.0).min(100.0) as u8
        }
    }

    /// Whether the session is past its TTL at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total_size: u64, chunk_size: u64) -> UploadSession {
        UploadSession {
            session_id: "s1".into(),
            user_id: "u1".into(),
            folder_id: None,
            filename: "big.bin".into(),
            mime_type: "application/octet-stream".into(),
            total_size,
            chunk_size,
            total_chunks: UploadSession::chunk_count(total_size, chunk_size),
            storage_key: "u1/k/big.bin".into(),
            variant: UploadVariant::Proxied,
            status: SessionStatus::Uploading,
            uploaded_chunks: BTreeSet::new(),
            client_hash: None,
            file_id: None,
            expires_at: Utc::now() + chrono::Duration::hours(24),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn chunk_count_boundaries() {
        assert_eq!(UploadSession::chunk_count(0, 100), 0);
        assert_eq!(UploadSession::chunk_count(100, 100), 1);
        assert_eq!(UploadSession::chunk_count(101, 100), 2);
    }

    #[test]
    fn last_chunk_carries_remainder() {
        let s = session(250, 100);
        assert_eq!(s.total_chunks, 3);
        assert_eq!(s.expected_chunk_len(0), 100);
        assert_eq!(s.expected_chunk_len(1), 100);
        assert_eq!(s.expected_chunk_len(2), 50);

        let exact = session(200, 100);
        assert_eq!(exact.expected_chunk_len(1), 100);
    }

    #[test]
    fn missing_chunks_sorted() {
        let mut s = session(250, 100);
        s.uploaded_chunks.insert(2);
        s.uploaded_chunks.insert(0);
        assert_eq!(s.missing_chunks(), vec![1]);
        assert!(!s.is_complete_set());
        s.uploaded_chunks.insert(1);
        assert!(s.is_complete_set());
    }

    #[test]
    fn empty_upload_is_trivially_complete() {
        let s = session(0, 100);
        assert_eq!(s.total_chunks, 0);
        assert!(s.is_complete_set());
        assert_eq!(s.progress_percent(), 100);
    }
}
