//! Embedded metadata store
//!
//! A small document engine: JSON documents in named collections with atomic
//! per-document mutation. Two backends:
//! - `MemoryStore`: concurrent maps; tests and cache-only deployments
//! - `SledStore`: persistent embedded KV, one tree per collection
//!
//! Every counter update in the system (session chunk sets, download
//! counters, quota usage) goes through `mutate`, never through
//! load-then-store at the caller; that is what makes field updates atomic
//! at the document level without multi-document transactions.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::ServiceError;

mod memory;
mod repos;
mod sled_store;

pub use memory::MemoryStore;
pub use repos::{FileRepo, FolderRepo, Repositories, SessionRepo, UserRepo};
pub use sled_store::SledStore;

/// Result type for metadata operations
pub type MetaResult<T> = Result<T, MetaError>;

/// Metadata engine failures
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("metadata backend error: {0}")]
    Backend(String),

    #[error("document serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MetaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<MetaError> for ServiceError {
    fn from(err: MetaError) -> Self {
        ServiceError::internal(err.to_string())
    }
}

/// Raw document engine; collections spring into existence on first write
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> MetaResult<Option<Value>>;

    /// Insert or replace
    async fn put(&self, collection: &str, id: &str, doc: Value) -> MetaResult<()>;

    /// Atomic read-modify-write under a per-document lock. Returns the
    /// updated document, or None when it does not exist.
    async fn mutate(
        &self,
        collection: &str,
        id: &str,
        apply: &mut (dyn for<'a> FnMut(&'a mut Value) + Send),
    ) -> MetaResult<Option<Value>>;

    /// Remove; true when a document was present
    async fn remove(&self, collection: &str, id: &str) -> MetaResult<bool>;

    /// Every document in the collection; callers batch-limit after filtering
    async fn scan(&self, collection: &str) -> MetaResult<Vec<Value>>;

    async fn count(&self, collection: &str) -> MetaResult<usize>;
}

/// Typed view over one collection
pub struct Collection<T> {
    store: Arc<dyn DocumentStore>,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), name: self.name, _marker: PhantomData }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn new(store: Arc<dyn DocumentStore>, name: &'static str) -> Self {
        Self { store, name, _marker: PhantomData }
    }

    pub async fn get(&self, id: &str) -> MetaResult<Option<T>> {
        match self.store.get(self.name, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, id: &str, doc: &T) -> MetaResult<()> {
        self.store.put(self.name, id, serde_json::to_value(doc)?).await
    }

    /// Atomically apply `f` to the document. Returns the updated document
    /// and the closure's result, or None when the document is absent.
    pub async fn mutate<R, F>(&self, id: &str, mut f: F) -> MetaResult<Option<(T, R)>>
    where
        F: FnMut(&mut T) -> R + Send,
        R: Send,
    {
        let mut outcome: Option<Result<R, MetaError>> = None;
        let mut apply = |value: &mut Value| {
            match serde_json::from_value::<T>(value.clone()) {
                Ok(mut doc) => {
                    let r = f(&mut doc);
                    match serde_json::to_value(&doc) {
                        Ok(updated) => {
                            *value = updated;
                            outcome = Some(Ok(r));
                        }
                        Err(e) => outcome = Some(Err(e.into())),
                    }
                }
                Err(e) => outcome = Some(Err(e.into())),
            }
        };
        let updated = self.store.mutate(self.name, id, &mut apply).await?;
        match (updated, outcome) {
            (None, _) => Ok(None),
            (Some(value), Some(Ok(r))) => Ok(Some((serde_json::from_value(value)?, r))),
            (Some(_), Some(Err(e))) => Err(e),
            (Some(_), None) => Err(MetaError::Backend("mutation closure never ran".to_string())),
        }
    }

    pub async fn remove(&self, id: &str) -> MetaResult<bool> {
        self.store.remove(self.name, id).await
    }

    pub async fn scan(&self) -> MetaResult<Vec<T>> {
        self.store
            .scan(self.name)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(MetaError::from))
            .collect()
    }

    pub async fn count(&self) -> MetaResult<usize> {
        self.store.count(self.name).await
    }
}

/// Collection names; one place so backends and tooling agree
pub mod collections {
    pub const USERS: &str = "users";
    pub const FILES: &str = "files";
    pub const FOLDERS: &str = "folders";
    pub const SESSIONS: &str = "upload_sessions";
    pub const QUOTAS: &str = "quotas";
}
