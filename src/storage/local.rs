//! Local filesystem backend
//!
//! Objects live under a root directory with `hot/` and `cold/` prefixes as
//! real directories; temp chunks under `temp/{session}/`. Writes publish via
//! a staging file plus rename so readers never observe partial objects.
//! The direct (presigned) upload variant is not available on this backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::warn;
use uuid::Uuid;

use super::key;
use super::{
    ByteRange, ByteStream, CompletedPart, MultipartInit, ObjectMeta, StorageError, StorageProvider,
    StorageResult, StorageTier, StoredObject,
};

/// Filesystem-backed provider
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str, tier: StorageTier) -> StorageResult<(String, PathBuf)> {
        let qualified = key::qualify(key, tier);
        let path = self.checked_path("object", &qualified)?;
        Ok((qualified, path))
    }

    fn checked_path(&self, op: &'static str, relative: &str) -> StorageResult<PathBuf> {
        if relative.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return Err(StorageError::InvalidKey { op, key: relative.to_string() });
        }
        Ok(self.root.join(relative))
    }

    fn chunk_dir(&self, session_id: &str) -> StorageResult<PathBuf> {
        self.checked_path("chunks", &key::chunk_prefix(session_id))
    }

    /// Write `data` to a staging file and rename it over `dest`
    async fn publish(&self, op: &'static str, dest: &Path, qualified: &str, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::failed(op, qualified, e))?;
        }
        let staging = dest.with_extension(format!("staging-{}", Uuid::new_v4()));
        let mut file = fs::File::create(&staging)
            .await
            .map_err(|e| StorageError::failed(op, qualified, e))?;
        file.write_all(data)
            .await
            .map_err(|e| StorageError::failed(op, qualified, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::failed(op, qualified, e))?;
        fs::rename(&staging, dest)
            .await
            .map_err(|e| StorageError::failed(op, qualified, e))
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn write(
        &self,
        key: &str,
        data: Bytes,
        tier: StorageTier,
        _content_type: Option<&str>,
    ) -> StorageResult<StoredObject> {
        let (qualified, path) = self.object_path(key, tier)?;
        let size = data.len() as u64;
        self.publish("write", &path, &qualified, &data).await?;
        Ok(StoredObject { key: qualified, tier, size })
    }

    async fn read(&self, key: &str, tier: StorageTier) -> StorageResult<Bytes> {
        let (qualified, path) = self.object_path(key, tier)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(qualified))
            }
            Err(e) => Err(StorageError::failed("read", qualified, e)),
        }
    }

    async fn stream(
        &self,
        key: &str,
        tier: StorageTier,
        range: Option<ByteRange>,
    ) -> StorageResult<ByteStream> {
        let (qualified, path) = self.object_path(key, tier)?;
        let mut file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(qualified))
            }
            Err(e) => return Err(StorageError::failed("stream", qualified, e)),
        };
        let size = file
            .metadata()
            .await
            .map_err(|e| StorageError::failed("stream", &qualified, e))?
            .len();

        match range {
            None => Ok(Box::pin(ReaderStream::new(file))),
            Some(range) => {
                let len = range
                    .length_within(size)
                    .ok_or_else(|| StorageError::failed("stream", &qualified, "range past end"))?;
                use tokio::io::AsyncSeekExt;
                file.seek(std::io::SeekFrom::Start(range.start))
                    .await
                    .map_err(|e| StorageError::failed("stream", &qualified, e))?;
                Ok(Box::pin(ReaderStream::new(file.take(len))))
            }
        }
    }

    async fn delete(&self, key: &str, tier: StorageTier) -> StorageResult<bool> {
        let (qualified, path) = self.object_path(key, tier)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            // Already absent still counts as deleted.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(StorageError::failed("delete", qualified, e)),
        }
    }

    async fn exists(&self, key: &str, tier: StorageTier) -> StorageResult<bool> {
        let (qualified, path) = self.object_path(key, tier)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::failed("exists", qualified, e)),
        }
    }

    async fn metadata(&self, key: &str, tier: StorageTier) -> StorageResult<ObjectMeta> {
        let (qualified, path) = self.object_path(key, tier)?;
        let meta = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(qualified))
            }
            Err(e) => return Err(StorageError::failed("metadata", qualified, e)),
        };
        let modified_at = meta.modified().ok().map(DateTime::<Utc>::from);
        let etag = modified_at.map(|m| format!("{:x}-{:x}", meta.len(), m.timestamp()));
        Ok(ObjectMeta { size: meta.len(), content_type: None, etag, modified_at })
    }

    async fn migrate(
        &self,
        key: &str,
        from: StorageTier,
        to: StorageTier,
    ) -> StorageResult<StoredObject> {
        let (src_key, src_path) = self.object_path(key, from)?;
        let (dst_key, dst_path) = self.object_path(key, to)?;
        if src_key == dst_key {
            let meta = self.metadata(key, from).await?;
            return Ok(StoredObject { key: src_key, tier: to, size: meta.size });
        }

        let size = match fs::metadata(&src_path).await {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(src_key))
            }
            Err(e) => return Err(StorageError::failed("migrate", src_key, e)),
        };

        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::failed("migrate", &dst_key, e))?;
        }
        // Copy first; the source stays intact until the target is published.
        let staging = dst_path.with_extension(format!("staging-{}", Uuid::new_v4()));
        if let Err(e) = fs::copy(&src_path, &staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::failed("migrate", src_key, e));
        }
        if let Err(e) = fs::rename(&staging, &dst_path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::failed("migrate", dst_key, e));
        }
        if let Err(e) = fs::remove_file(&src_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %src_key, error = %e, "migrate left a stale source copy");
            }
        }
        Ok(StoredObject { key: dst_key, tier: to, size })
    }

    async fn write_chunk(&self, session_id: &str, index: u32, data: Bytes) -> StorageResult<()> {
        let relative = key::chunk_key(session_id, index);
        let path = self.checked_path("write_chunk", &relative)?;
        self.publish("write_chunk", &path, &relative, &data).await
    }

    async fn assemble(
        &self,
        session_id: &str,
        final_key: &str,
        total_chunks: u32,
        tier: StorageTier,
    ) -> StorageResult<StoredObject> {
        let (qualified, dest) = self.object_path(final_key, tier)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::failed("assemble", &qualified, e))?;
        }

        let staging = dest.with_extension(format!("staging-{}", Uuid::new_v4()));
        let mut out = fs::File::create(&staging)
            .await
            .map_err(|e| StorageError::failed("assemble", &qualified, e))?;
        let mut size: u64 = 0;

        for index in 0..total_chunks {
            let chunk_rel = key::chunk_key(session_id, index);
            let chunk_path = self.checked_path("assemble", &chunk_rel)?;
            let mut chunk = match fs::File::open(&chunk_path).await {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    let _ = fs::remove_file(&staging).await;
                    return Err(StorageError::not_found(chunk_rel));
                }
                Err(e) => {
                    let _ = fs::remove_file(&staging).await;
                    return Err(StorageError::failed("assemble", chunk_rel, e));
                }
            };
            size += tokio::io::copy(&mut chunk, &mut out)
                .await
                .map_err(|e| StorageError::failed("assemble", &qualified, e))?;
        }

        out.sync_all()
            .await
            .map_err(|e| StorageError::failed("assemble", &qualified, e))?;
        drop(out);
        fs::rename(&staging, &dest)
            .await
            .map_err(|e| StorageError::failed("assemble", &qualified, e))?;

        self.delete_chunks(session_id).await?;
        Ok(StoredObject { key: qualified, tier, size })
    }

    async fn delete_chunks(&self, session_id: &str) -> StorageResult<()> {
        let dir = self.chunk_dir(session_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::failed("delete_chunks", key::chunk_prefix(session_id), e)),
        }
    }

    async fn init_multipart(&self, _key: &str, _tier: StorageTier) -> StorageResult<MultipartInit> {
        Err(StorageError::Unsupported { op: "init_multipart" })
    }

    async fn sign_part_upload(
        &self,
        _key: &str,
        _upload_id: &str,
        _part_number: u32,
        _ttl: Duration,
    ) -> StorageResult<String> {
        Err(StorageError::Unsupported { op: "sign_part_upload" })
    }

    async fn complete_multipart(
        &self,
        _key: &str,
        _upload_id: &str,
        _parts: &[CompletedPart],
    ) -> StorageResult<StoredObject> {
        Err(StorageError::Unsupported { op: "complete_multipart" })
    }

    async fn abort_multipart(&self, _key: &str, _upload_id: &str) -> StorageResult<()> {
        Err(StorageError::Unsupported { op: "abort_multipart" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn provider() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        (dir, storage)
    }

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn write_read_round_trip() {
        let (_dir, storage) = provider();
        let stored = storage
            .write("u1/k/a.txt", Bytes::from_static(b"hello"), StorageTier::Hot, None)
            .await
            .unwrap();
        assert_eq!(stored.key, "hot/u1/k/a.txt");
        assert_eq!(stored.size, 5);

        // Fully qualified keys pass back verbatim without re-prefixing.
        let data = storage.read(&stored.key, StorageTier::Hot).await.unwrap();
        assert_eq!(&data[..], b"hello");
        assert!(storage.exists(&stored.key, StorageTier::Hot).await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, storage) = provider();
        storage
            .write("u1/k/a.txt", Bytes::from_static(b"x"), StorageTier::Hot, None)
            .await
            .unwrap();
        assert!(storage.delete("u1/k/a.txt", StorageTier::Hot).await.unwrap());
        assert!(storage.delete("u1/k/a.txt", StorageTier::Hot).await.unwrap());
        assert!(!storage.exists("u1/k/a.txt", StorageTier::Hot).await.unwrap());
    }

    #[tokio::test]
    async fn stream_honors_ranges() {
        let (_dir, storage) = provider();
        storage
            .write("u1/k/a.txt", Bytes::from_static(b"0123456789"), StorageTier::Hot, None)
            .await
            .unwrap();

        let full = storage.stream("u1/k/a.txt", StorageTier::Hot, None).await.unwrap();
        assert_eq!(collect(full).await, b"0123456789");

        let range = ByteRange { start: 2, end: Some(5) };
        let part = storage.stream("u1/k/a.txt", StorageTier::Hot, Some(range)).await.unwrap();
        assert_eq!(collect(part).await, b"2345");

        let tail = ByteRange { start: 7, end: None };
        let part = storage.stream("u1/k/a.txt", StorageTier::Hot, Some(tail)).await.unwrap();
        assert_eq!(collect(part).await, b"789");
    }

    #[tokio::test]
    async fn migrate_moves_exactly_one_copy() {
        let (_dir, storage) = provider();
        storage
            .write("u1/k/a.txt", Bytes::from_static(b"data"), StorageTier::Hot, None)
            .await
            .unwrap();

        let moved = storage.migrate("hot/u1/k/a.txt", StorageTier::Hot, StorageTier::Cold).await.unwrap();
        assert_eq!(moved.key, "cold/u1/k/a.txt");
        assert!(!storage.exists("u1/k/a.txt", StorageTier::Hot).await.unwrap());
        assert!(storage.exists("u1/k/a.txt", StorageTier::Cold).await.unwrap());
    }

    #[tokio::test]
    async fn migrate_missing_source_fails_cleanly() {
        let (_dir, storage) = provider();
        let err = storage.migrate("u1/k/gone", StorageTier::Hot, StorageTier::Cold).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn assemble_concatenates_in_index_order() {
        let (_dir, storage) = provider();
        storage.write_chunk("s1", 1, Bytes::from_static(b"world")).await.unwrap();
        storage.write_chunk("s1", 0, Bytes::from_static(b"hello ")).await.unwrap();

        let stored = storage.assemble("s1", "u1/k/greeting.txt", 2, StorageTier::Hot).await.unwrap();
        assert_eq!(stored.size, 11);
        let data = storage.read("u1/k/greeting.txt", StorageTier::Hot).await.unwrap();
        assert_eq!(&data[..], b"hello world");

        // Temp chunks are gone after assembly.
        let dir = storage.chunk_dir("s1").unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn assemble_missing_chunk_reports_not_found() {
        let (_dir, storage) = provider();
        storage.write_chunk("s2", 0, Bytes::from_static(b"a")).await.unwrap();
        let err = storage.assemble("s2", "u1/k/x", 2, StorageTier::Hot).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        // Chunks survive a failed assembly for the retry.
        assert!(storage.chunk_dir("s2").unwrap().join("chunk_0").exists());
    }

    #[tokio::test]
    async fn assemble_zero_chunks_builds_empty_object() {
        let (_dir, storage) = provider();
        let stored = storage.assemble("s3", "u1/k/empty", 0, StorageTier::Hot).await.unwrap();
        assert_eq!(stored.size, 0);
        let meta = storage.metadata("u1/k/empty", StorageTier::Hot).await.unwrap();
        assert_eq!(meta.size, 0);
    }

    #[tokio::test]
    async fn chunk_overwrite_is_safe() {
        let (_dir, storage) = provider();
        storage.write_chunk("s4", 0, Bytes::from_static(b"first")).await.unwrap();
        storage.write_chunk("s4", 0, Bytes::from_static(b"again")).await.unwrap();
        let stored = storage.assemble("s4", "u1/k/y", 1, StorageTier::Hot).await.unwrap();
        assert_eq!(stored.size, 5);
        assert_eq!(&storage.read("u1/k/y", StorageTier::Hot).await.unwrap()[..], b"again");
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (_dir, storage) = provider();
        let err = storage.read("../etc/passwd", StorageTier::Hot).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn direct_uploads_are_unsupported() {
        let (_dir, storage) = provider();
        assert!(!storage.supports_presigned_uploads());
        let err = storage.init_multipart("u1/k/z", StorageTier::Hot).await.unwrap_err();
        assert!(matches!(err, StorageError::Unsupported { .. }));
    }
}
