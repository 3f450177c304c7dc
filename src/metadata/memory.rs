//! In-memory document backend

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{DocumentStore, MetaResult};

/// Concurrent-map backend; contents die with the process
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, DashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, name: &str) -> dashmap::mapref::one::RefMut<'_, String, DashMap<String, Value>> {
        self.collections.entry(name.to_string()).or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> MetaResult<Option<Value>> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|col| col.get(id).map(|doc| doc.clone())))
    }

    async fn put(&self, collection: &str, id: &str, doc: Value) -> MetaResult<()> {
        self.collection(collection).insert(id.to_string(), doc);
        Ok(())
    }

    async fn mutate(
        &self,
        collection: &str,
        id: &str,
        apply: &mut (dyn for<'a> FnMut(&'a mut Value) + Send),
    ) -> MetaResult<Option<Value>> {
        let col = self.collection(collection);
        // The entry guard is the per-document lock.
        let result = match col.get_mut(id) {
            Some(mut entry) => {
                apply(entry.value_mut());
                Ok(Some(entry.value().clone()))
            }
            None => Ok(None),
        };
        result
    }

    async fn remove(&self, collection: &str, id: &str) -> MetaResult<bool> {
        Ok(self
            .collections
            .get(collection)
            .map(|col| col.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn scan(&self, collection: &str) -> MetaResult<Vec<Value>> {
        Ok(self
            .collections
            .get(collection)
            .map(|col| col.iter().map(|doc| doc.value().clone()).collect())
            .unwrap_or_default())
    }

    async fn count(&self, collection: &str) -> MetaResult<usize> {
        Ok(self.collections.get(collection).map(|col| col.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_remove_round_trip() {
        let store = MemoryStore::new();
        store.put("c", "1", json!({"x": 1})).await.unwrap();
        assert_eq!(store.get("c", "1").await.unwrap(), Some(json!({"x": 1})));
        assert_eq!(store.count("c").await.unwrap(), 1);
        assert!(store.remove("c", "1").await.unwrap());
        assert!(!store.remove("c", "1").await.unwrap());
        assert_eq!(store.get("c", "1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_returns_all_documents() {
        let store = MemoryStore::new();
        store.put("c", "1", json!({"x": 1})).await.unwrap();
        store.put("c", "2", json!({"x": 2})).await.unwrap();
        assert_eq!(store.scan("c").await.unwrap().len(), 2);
        assert!(store.scan("other").await.unwrap().is_empty());
    }
}
