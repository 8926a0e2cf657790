use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheHandle, CacheStorage};
use crate::error::Result;
use crate::request::RequestKey;
use crate::response::StoredResponse;

/// In-memory store namespace.
/// Clone is cheap - all clones share the same stores.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    // Vec keeps creation order for `keys()`
    stores: Arc<RwLock<Vec<Arc<MemoryCache>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheHandle>> {
        let mut stores = self.stores.write().await;
        if let Some(existing) = stores.iter().find(|s| s.name == name) {
            let handle: Arc<dyn CacheHandle> = existing.clone();
            return Ok(handle);
        }
        let cache = Arc::new(MemoryCache::new(name));
        stores.push(cache.clone());
        let handle: Arc<dyn CacheHandle> = cache;
        Ok(handle)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.stores.read().await.iter().any(|s| s.name == name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .stores
            .read()
            .await
            .iter()
            .map(|s| s.name.clone())
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut stores = self.stores.write().await;
        let before = stores.len();
        stores.retain(|s| s.name != name);
        Ok(stores.len() != before)
    }
}

/// A single in-memory store.
///
/// Handles outlive deletion of their store: writes after deletion land in a
/// detached map that nothing can reopen.
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<RequestKey, StoredResponse>>,
}

impl MemoryCache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheHandle for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<StoredResponse>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: RequestKey, response: StoredResponse) -> Result<()> {
        self.entries.write().await.insert(key, response);
        Ok(())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<RequestKey>> {
        let mut keys: Vec<_> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
