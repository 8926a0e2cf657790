//! Named, versioned response stores.
//!
//! A `CacheStorage` is the namespace of stores (one per cache version ever
//! installed); a `CacheHandle` is one opened store mapping request identity
//! to a stored response snapshot.
//!
//! Two backends are provided:
//! - `MemoryStorage`: in-process, shared between clones
//! - `DiskStorage`: one directory per store, one file per entry

pub mod disk;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::request::RequestKey;
use crate::response::StoredResponse;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// The set of named stores.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open the store with this name, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheHandle>>;

    /// Check whether a store with this name exists
    async fn has(&self, name: &str) -> Result<bool>;

    /// Names of all existing stores, oldest first.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete a store and every entry in it. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// One opened store.
///
/// Puts for the same key overwrite; there is no cross-key locking.
#[async_trait]
pub trait CacheHandle: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &RequestKey) -> Result<Option<StoredResponse>>;

    async fn put(&self, key: RequestKey, response: StoredResponse) -> Result<()>;

    async fn delete(&self, key: &RequestKey) -> Result<bool>;

    async fn keys(&self) -> Result<Vec<RequestKey>>;
}
