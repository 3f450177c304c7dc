//! In-process backend
//!
//! Keeps objects, staged chunks, and multipart state in concurrent maps.
//! Used by the test suite and by ephemeral single-node deployments; it is
//! the only backend besides S3 that supports the direct upload variant,
//! simulating part PUTs through `put_presigned_part`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::key;
use super::{
    ByteRange, ByteStream, CompletedPart, MultipartInit, ObjectMeta, StorageError, StorageProvider,
    StorageResult, StorageTier, StoredObject,
};

struct StoredBlob {
    data: Bytes,
    content_type: Option<String>,
    modified_at: DateTime<Utc>,
}

struct MultipartState {
    key: String,
    tier: StorageTier,
    parts: BTreeMap<u32, (String, Bytes)>,
}

/// Concurrent-map-backed provider
pub struct MemoryStorage {
    objects: DashMap<String, StoredBlob>,
    chunks: DashMap<String, Bytes>,
    multiparts: DashMap<String, Mutex<MultipartState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self { objects: DashMap::new(), chunks: DashMap::new(), multiparts: DashMap::new() }
    }

    fn etag_of(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Simulate the client PUT against a URL minted by `sign_part_upload`.
    /// Returns the ETag exactly as an HTTP response would carry it,
    /// surrounding quotes included.
    pub fn put_presigned_part(&self, url: &str, data: Bytes) -> StorageResult<String> {
        let rest = url
            .strip_prefix("memory://part/")
            .ok_or_else(|| StorageError::failed("put_part", url, "unrecognized url"))?;
        let (upload_id, part_number) = rest
            .split_once('/')
            .ok_or_else(|| StorageError::failed("put_part", url, "unrecognized url"))?;
        let part_number: u32 = part_number
            .parse()
            .map_err(|_| StorageError::failed("put_part", url, "bad part number"))?;

        let state = self
            .multiparts
            .get(upload_id)
            .ok_or_else(|| StorageError::not_found(upload_id))?;
        let etag = Self::etag_of(&data);
        state.lock().parts.insert(part_number, (etag.clone(), data));
        Ok(format!("\"{}\"", etag))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn supports_presigned_uploads(&self) -> bool {
        true
    }

    async fn write(
        &self,
        key: &str,
        data: Bytes,
        tier: StorageTier,
        content_type: Option<&str>,
    ) -> StorageResult<StoredObject> {
        let qualified = key::qualify(key, tier);
        let size = data.len() as u64;
        self.objects.insert(
            qualified.clone(),
            StoredBlob {
                data,
                content_type: content_type.map(str::to_string),
                modified_at: Utc::now(),
            },
        );
        Ok(StoredObject { key: qualified, tier, size })
    }

    async fn read(&self, key: &str, tier: StorageTier) -> StorageResult<Bytes> {
        let qualified = key::qualify(key, tier);
        self.objects
            .get(&qualified)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| StorageError::not_found(qualified))
    }

    async fn stream(
        &self,
        key: &str,
        tier: StorageTier,
        range: Option<ByteRange>,
    ) -> StorageResult<ByteStream> {
        let data = self.read(key, tier).await?;
        let sliced = match range {
            None => data,
            Some(range) => {
                let len = range.length_within(data.len() as u64).ok_or_else(|| {
                    StorageError::failed("stream", key::qualify(key, tier), "range past end")
                })?;
                data.slice(range.start as usize..(range.start + len) as usize)
            }
        };
        Ok(Box::pin(futures::stream::once(async move { Ok(sliced) })))
    }

    async fn delete(&self, key: &str, tier: StorageTier) -> StorageResult<bool> {
        self.objects.remove(&key::qualify(key, tier));
        Ok(true)
    }

    async fn exists(&self, key: &str, tier: StorageTier) -> StorageResult<bool> {
        Ok(self.objects.contains_key(&key::qualify(key, tier)))
    }

    async fn metadata(&self, key: &str, tier: StorageTier) -> StorageResult<ObjectMeta> {
        let qualified = key::qualify(key, tier);
        let blob = self
            .objects
            .get(&qualified)
            .ok_or_else(|| StorageError::not_found(qualified))?;
        Ok(ObjectMeta {
            size: blob.data.len() as u64,
            content_type: blob.content_type.clone(),
            etag: Some(Self::etag_of(&blob.data)),
            modified_at: Some(blob.modified_at),
        })
    }

    async fn migrate(
        &self,
        key: &str,
        from: StorageTier,
        to: StorageTier,
    ) -> StorageResult<StoredObject> {
        let src = key::qualify(key, from);
        let dst = key::qualify(key, to);
        if src == dst {
            let meta = self.metadata(key, from).await?;
            return Ok(StoredObject { key: dst, tier: to, size: meta.size });
        }
        let (_, blob) = self.objects.remove(&src).ok_or_else(|| StorageError::not_found(src))?;
        let size = blob.data.len() as u64;
        self.objects.insert(dst.clone(), blob);
        Ok(StoredObject { key: dst, tier: to, size })
    }

    async fn write_chunk(&self, session_id: &str, index: u32, data: Bytes) -> StorageResult<()> {
        self.chunks.insert(key::chunk_key(session_id, index), data);
        Ok(())
    }

    async fn assemble(
        &self,
        session_id: &str,
        final_key: &str,
        total_chunks: u32,
        tier: StorageTier,
    ) -> StorageResult<StoredObject> {
        let mut buf = BytesMut::new();
        for index in 0..total_chunks {
            let chunk_key = key::chunk_key(session_id, index);
            let chunk = self
                .chunks
                .get(&chunk_key)
                .map(|c| c.clone())
                .ok_or_else(|| StorageError::not_found(chunk_key))?;
            buf.extend_from_slice(&chunk);
        }
        let stored = self.write(final_key, buf.freeze(), tier, None).await?;
        self.delete_chunks(session_id).await?;
        Ok(stored)
    }

    async fn delete_chunks(&self, session_id: &str) -> StorageResult<()> {
        let prefix = format!("{}/", key::chunk_prefix(session_id));
        self.chunks.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    async fn init_multipart(&self, key: &str, tier: StorageTier) -> StorageResult<MultipartInit> {
        let qualified = key::qualify(key, tier);
        let upload_id = Uuid::new_v4().to_string();
        self.multiparts.insert(
            upload_id.clone(),
            Mutex::new(MultipartState { key: qualified.clone(), tier, parts: BTreeMap::new() }),
        );
        Ok(MultipartInit { upload_id, key: qualified })
    }

    async fn sign_part_upload(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        _ttl: Duration,
    ) -> StorageResult<String> {
        if !self.multiparts.contains_key(upload_id) {
            return Err(StorageError::not_found(upload_id));
        }
        Ok(format!("memory://part/{}/{}", upload_id, part_number))
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<StoredObject> {
        // Guards are released before any await point.
        let (tier, data) = {
            let state_ref = self
                .multiparts
                .get(upload_id)
                .ok_or_else(|| StorageError::not_found(upload_id))?;
            let state = state_ref.lock();
            let mut buf = BytesMut::new();
            let mut expected = 1u32;
            for part in parts {
                if part.part_number != expected {
                    return Err(StorageError::failed(
                        "complete_multipart",
                        &state.key,
                        format!("part {} out of order or missing", expected),
                    ));
                }
                let (etag, data) = state.parts.get(&part.part_number).ok_or_else(|| {
                    StorageError::failed(
                        "complete_multipart",
                        &state.key,
                        format!("part {} was never uploaded", part.part_number),
                    )
                })?;
                if etag != part.etag.trim_matches('"') {
                    return Err(StorageError::failed(
                        "complete_multipart",
                        &state.key,
                        format!("etag mismatch on part {}", part.part_number),
                    ));
                }
                buf.extend_from_slice(data);
                expected += 1;
            }
            (state.tier, buf.freeze())
        };

        let stored = self.write(key, data, tier, None).await?;
        self.multiparts.remove(upload_id);
        Ok(stored)
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> StorageResult<()> {
        self.multiparts.remove(upload_id);
        Ok(())
    }
}
