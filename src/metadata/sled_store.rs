//! Persistent document backend over sled
//!
//! One sled tree per collection, JSON-encoded documents. Mutations take a
//! striped per-document lock so read-modify-write is atomic without sled
//! transactions; this store is single-instance by design.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{DocumentStore, MetaError, MetaResult};

const LOCK_STRIPES: usize = 64;

/// Embedded persistent backend
pub struct SledStore {
    db: sled::Db,
    trees: DashMap<String, sled::Tree>,
    stripes: Vec<Mutex<()>>,
}

impl SledStore {
    /// Open (or create) the store under `path`
    pub fn open(path: impl AsRef<Path>) -> MetaResult<Self> {
        let db = sled::open(path).map_err(|e| MetaError::Backend(e.to_string()))?;
        let stripes = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();
        Ok(Self { db, trees: DashMap::new(), stripes })
    }

    /// Flush dirty pages; called at shutdown
    pub async fn flush(&self) -> MetaResult<()> {
        self.db
            .flush_async()
            .await
            .map(|_| ())
            .map_err(|e| MetaError::Backend(e.to_string()))
    }

    fn tree(&self, collection: &str) -> MetaResult<sled::Tree> {
        if let Some(tree) = self.trees.get(collection) {
            return Ok(tree.clone());
        }
        let tree = self
            .db
            .open_tree(collection)
            .map_err(|e| MetaError::Backend(e.to_string()))?;
        self.trees.insert(collection.to_string(), tree.clone());
        Ok(tree)
    }

    fn stripe(&self, collection: &str, id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        collection.hash(&mut hasher);
        id.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % LOCK_STRIPES]
    }

    fn decode(raw: &[u8]) -> MetaResult<Value> {
        serde_json::from_slice(raw).map_err(MetaError::from)
    }
}

#[async_trait]
impl DocumentStore for SledStore {
    async fn get(&self, collection: &str, id: &str) -> MetaResult<Option<Value>> {
        let tree = self.tree(collection)?;
        match tree.get(id).map_err(|e| MetaError::Backend(e.to_string()))? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, collection: &str, id: &str, doc: Value) -> MetaResult<()> {
        let tree = self.tree(collection)?;
        let encoded = serde_json::to_vec(&doc)?;
        let _guard = self.stripe(collection, id).lock().await;
        tree.insert(id, encoded).map_err(|e| MetaError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn mutate(
        &self,
        collection: &str,
        id: &str,
        apply: &mut (dyn for<'a> FnMut(&'a mut Value) + Send),
    ) -> MetaResult<Option<Value>> {
        let tree = self.tree(collection)?;
        let _guard = self.stripe(collection, id).lock().await;
        let raw = match tree.get(id).map_err(|e| MetaError::Backend(e.to_string()))? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let mut doc = Self::decode(&raw)?;
        apply(&mut doc);
        tree.insert(id, serde_json::to_vec(&doc)?)
            .map_err(|e| MetaError::Backend(e.to_string()))?;
        Ok(Some(doc))
    }

    async fn remove(&self, collection: &str, id: &str) -> MetaResult<bool> {
        let tree = self.tree(collection)?;
        let _guard = self.stripe(collection, id).lock().await;
        Ok(tree
            .remove(id)
            .map_err(|e| MetaError::Backend(e.to_string()))?
            .is_some())
    }

    async fn scan(&self, collection: &str) -> MetaResult<Vec<Value>> {
        let tree = self.tree(collection)?;
        let mut docs = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (_, raw) = entry.map_err(|e| MetaError::Backend(e.to_string()))?;
            docs.push(Self::decode(&raw)?);
        }
        Ok(docs)
    }

    async fn count(&self, collection: &str) -> MetaResult<usize> {
        Ok(self.tree(collection)?.len())
    }
}
