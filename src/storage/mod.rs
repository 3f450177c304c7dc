//! Storage provider abstraction
//!
//! Opaque blob I/O over two placement tiers. Concrete backends:
//! - `LocalStorage`: filesystem with `hot/` and `cold/` directory prefixes
//! - `S3Storage`: single S3-compatible bucket with hot/cold key prefixes,
//!   native multipart and presigned part uploads
//! - `MemoryStorage`: in-process store for tests and ephemeral deployments
//!
//! Keys returned by a provider are fully qualified (tier prefix included);
//! callers pass them back verbatim and providers never double-apply a
//! prefix. `delete` is idempotent: an already-absent object counts as
//! deleted.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};

pub mod key;
mod local;
mod memory;
mod s3;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use s3::S3Storage;

/// Result type for provider operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Blob-store failure, tagged with the operation that failed
#[derive(Debug, Error)]
pub enum StorageError {
    /// Object absent where one was required
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// The backend cannot perform this operation at all
    #[error("operation {op} not supported by this provider")]
    Unsupported { op: &'static str },

    /// A key was rejected by the prefix policy
    #[error("invalid key for {op}: {key}")]
    InvalidKey { op: &'static str, key: String },

    /// Upstream or I/O failure
    #[error("{op} failed on {key}: {cause}")]
    Failed { op: &'static str, key: String, cause: String },
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn failed(op: &'static str, key: impl Into<String>, cause: impl ToString) -> Self {
        Self::Failed { op, key: key.into(), cause: cause.to_string() }
    }
}

/// Logical placement class; maps to a key prefix on backends without real
/// tiering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Hot,
    Cold,
}

impl StorageTier {
    /// Key prefix for this tier
    pub fn prefix(&self) -> &'static str {
        match self {
            StorageTier::Hot => "hot",
            StorageTier::Cold => "cold",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.prefix()
    }
}

impl std::str::FromStr for StorageTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hot" => Ok(StorageTier::Hot),
            "cold" => Ok(StorageTier::Cold),
            other => Err(format!("invalid tier: {}", other)),
        }
    }
}

/// Outcome of a write/assemble/migrate: where the object landed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    /// Fully qualified key; pass back verbatim
    pub key: String,
    pub tier: StorageTier,
    pub size: u64,
}

/// Object metadata without the payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Inclusive byte range request; `end = None` means "to the end"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Byte count the range covers within an object of `size` bytes,
    /// or None when the range starts at or past the end
    pub fn length_within(&self, size: u64) -> Option<u64> {
        if self.start >= size {
            return None;
        }
        let end = self.end.map_or(size - 1, |e| e.min(size - 1));
        Some(end - self.start + 1)
    }

    /// HTTP `Range` header value
    pub fn to_header(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Streamed object payload
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + 'static>>;

/// Handle for a provider-native multipart upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartInit {
    pub upload_id: String,
    /// Fully qualified destination key
    pub key: String,
}

/// One finished part of a multipart upload. Part numbers are 1-based and
/// must be supplied ascending without gaps at completion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    /// ETag as returned by the part PUT, surrounding quotes stripped
    pub etag: String,
}

/// Opaque blob I/O over two placement tiers
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Provider name for logs and the storage-info endpoint
    fn name(&self) -> &'static str;

    /// Whether `sign_part_upload` produces usable URLs (direct variant)
    fn supports_presigned_uploads(&self) -> bool {
        false
    }

    /// Store `data` at `key` on `tier` with overwrite semantics
    async fn write(
        &self,
        key: &str,
        data: Bytes,
        tier: StorageTier,
        content_type: Option<&str>,
    ) -> StorageResult<StoredObject>;

    /// Read the whole object
    async fn read(&self, key: &str, tier: StorageTier) -> StorageResult<Bytes>;

    /// Stream the object, optionally a byte range of it
    async fn stream(
        &self,
        key: &str,
        tier: StorageTier,
        range: Option<ByteRange>,
    ) -> StorageResult<ByteStream>;

    /// Remove the object; true when it no longer exists afterwards
    /// (including when it was already absent)
    async fn delete(&self, key: &str, tier: StorageTier) -> StorageResult<bool>;

    async fn exists(&self, key: &str, tier: StorageTier) -> StorageResult<bool>;

    async fn metadata(&self, key: &str, tier: StorageTier) -> StorageResult<ObjectMeta>;

    /// Move the object between tiers. Exactly one copy exists on success;
    /// on any failure the source copy remains intact. Returns the new
    /// fully qualified key.
    async fn migrate(
        &self,
        key: &str,
        from: StorageTier,
        to: StorageTier,
    ) -> StorageResult<StoredObject>;

    // ------------------------------------------------------------------
    // Chunked-upload helpers (proxied variant)
    // ------------------------------------------------------------------

    /// Stage one chunk at the session's temp key; overwrite on retry
    async fn write_chunk(&self, session_id: &str, index: u32, data: Bytes) -> StorageResult<()>;

    /// Concatenate chunks `0..total_chunks` in order into `final_key` on
    /// `tier`, then drop the temp chunks. Idempotent given the same inputs.
    async fn assemble(
        &self,
        session_id: &str,
        final_key: &str,
        total_chunks: u32,
        tier: StorageTier,
    ) -> StorageResult<StoredObject>;

    /// Best-effort removal of a session's staged chunks
    async fn delete_chunks(&self, session_id: &str) -> StorageResult<()>;

    // ------------------------------------------------------------------
    // Multipart helpers (direct variant)
    // ------------------------------------------------------------------

    async fn init_multipart(&self, key: &str, tier: StorageTier) -> StorageResult<MultipartInit>;

    /// Presigned PUT URL for one part
    async fn sign_part_upload(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> StorageResult<String>;

    /// Finish the multipart upload; `parts` must be ascending and gap-free
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<StoredObject>;

    /// Abandon the multipart upload; idempotent
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()>;
}

/// Build the configured provider
pub fn create_provider(cfg: &StorageConfig) -> StorageResult<Arc<dyn StorageProvider>> {
    match cfg.backend {
        StorageBackend::Local => Ok(Arc::new(LocalStorage::new(cfg.local_root.clone()))),
        StorageBackend::S3 => Ok(Arc::new(S3Storage::new(cfg.s3.clone()))),
        StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
    }
}
