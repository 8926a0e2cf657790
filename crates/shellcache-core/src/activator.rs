//! Activate step: purge stale stores, then take over open client sessions.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::clients::Clients;
use crate::error::CacheError;
use crate::manifest::CacheVersion;
use crate::storage::CacheStorage;

#[derive(Debug)]
pub struct ActivationReport {
    pub version: CacheVersion,
    /// Stale stores removed by this activation
    pub deleted: Vec<String>,
    /// Stale stores that could not be removed, with the reason
    pub failed: Vec<(String, CacheError)>,
    /// Set when the store names could not be listed; no cleanup happened
    pub enumerate_error: Option<CacheError>,
    /// Sessions whose controller changed to this version
    pub claimed: usize,
}

impl ActivationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.enumerate_error.is_none()
    }
}

pub struct Activator {
    version: CacheVersion,
    storage: Arc<dyn CacheStorage>,
    clients: Clients,
}

impl Activator {
    pub fn new(version: CacheVersion, storage: Arc<dyn CacheStorage>, clients: Clients) -> Self {
        Self {
            version,
            storage,
            clients,
        }
    }

    /// Delete every store not named after the current version, then claim clients.
    ///
    /// Deletions run concurrently and independently. Claiming happens only after
    /// all of them have settled, whatever their outcome.
    pub async fn activate(&self) -> ActivationReport {
        let mut report = ActivationReport {
            version: self.version.clone(),
            deleted: Vec::new(),
            failed: Vec::new(),
            enumerate_error: None,
            claimed: 0,
        };

        match self.storage.keys().await {
            Ok(names) => self.delete_stale(names, &mut report).await,
            Err(e) => {
                warn!(version = %self.version, error = %e, "Failed to list cache stores");
                report.enumerate_error = Some(e);
            }
        }

        report.claimed = self.clients.claim(&self.version).await;
        info!(
            version = %self.version,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            claimed = report.claimed,
            "Activation complete"
        );
        report
    }

    async fn delete_stale(&self, names: Vec<String>, report: &mut ActivationReport) {
        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| name != self.version.as_str())
            .collect();

        let deletions = stale.into_iter().map(|name| async move {
            info!(store = %name, "Clearing old cache");
            let result = self.storage.delete(&name).await;
            (name, result)
        });

        for (name, result) in join_all(deletions).await {
            match result {
                Ok(true) => report.deleted.push(name),
                // Already gone, e.g. a concurrent activation got there first
                Ok(false) => {}
                Err(e) => {
                    warn!(store = %name, error = %e, "Failed to delete old cache");
                    report.failed.push((name, e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::storage::{CacheHandle, MemoryStorage};
    use async_trait::async_trait;

    /// Storage whose deletes fail for chosen names
    struct FlakyStorage {
        inner: MemoryStorage,
        undeletable: Vec<String>,
        unlistable: bool,
    }

    #[async_trait]
    impl CacheStorage for FlakyStorage {
        async fn open(&self, name: &str) -> Result<Arc<dyn CacheHandle>> {
            self.inner.open(name).await
        }

        async fn has(&self, name: &str) -> Result<bool> {
            self.inner.has(name).await
        }

        async fn keys(&self) -> Result<Vec<String>> {
            if self.unlistable {
                return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into());
            }
            self.inner.keys().await
        }

        async fn delete(&self, name: &str) -> Result<bool> {
            if self.undeletable.iter().any(|n| n == name) {
                return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked").into());
            }
            self.inner.delete(name).await
        }
    }

    async fn storage_with(names: &[&str]) -> MemoryStorage {
        let storage = MemoryStorage::new();
        for name in names {
            storage.open(name).await.unwrap();
        }
        storage
    }

    #[tokio::test]
    async fn test_only_current_store_survives() {
        let storage = storage_with(&["v5", "v6"]).await;
        let activator = Activator::new(CacheVersion::new("v6"), Arc::new(storage.clone()), Clients::new());

        let report = activator.activate().await;

        assert!(report.is_clean());
        assert_eq!(report.deleted, vec!["v5"]);
        assert_eq!(storage.keys().await.unwrap(), vec!["v6"]);
    }

    #[tokio::test]
    async fn test_many_stale_stores_are_all_removed() {
        let storage = storage_with(&["v1", "v2", "v3", "v4", "v7"]).await;
        let activator = Activator::new(CacheVersion::new("v7"), Arc::new(storage.clone()), Clients::new());

        let report = activator.activate().await;

        assert_eq!(report.deleted.len(), 4);
        assert_eq!(storage.keys().await.unwrap(), vec!["v7"]);
    }

    #[tokio::test]
    async fn test_one_failed_delete_does_not_block_others_or_claim() {
        let inner = storage_with(&["v3", "v4", "v5", "v6"]).await;
        let storage = FlakyStorage {
            inner: inner.clone(),
            undeletable: vec!["v4".to_string()],
            unlistable: false,
        };
        let clients = Clients::new();
        let session = clients.open_controlled("https://app.test/", Some(CacheVersion::new("v5"))).await;
        let activator = Activator::new(CacheVersion::new("v6"), Arc::new(storage), clients.clone());

        let report = activator.activate().await;

        assert!(!report.is_clean());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "v4");
        assert_eq!(report.deleted, vec!["v3", "v5"]);
        assert_eq!(inner.keys().await.unwrap(), vec!["v4", "v6"]);
        assert_eq!(report.claimed, 1);
        assert_eq!(clients.controller(session).await, Some(CacheVersion::new("v6")));
    }

    #[tokio::test]
    async fn test_enumeration_failure_still_claims() {
        let storage = FlakyStorage {
            inner: storage_with(&["v5"]).await,
            undeletable: Vec::new(),
            unlistable: true,
        };
        let clients = Clients::new();
        clients.open("https://app.test/").await;
        let activator = Activator::new(CacheVersion::new("v6"), Arc::new(storage), clients);

        let report = activator.activate().await;

        assert!(report.enumerate_error.is_some());
        assert!(report.deleted.is_empty());
        assert_eq!(report.claimed, 1);
    }

    #[tokio::test]
    async fn test_activation_without_current_store() {
        // Install may have failed to open the store; activation must not create it
        let storage = storage_with(&["v5"]).await;
        let activator = Activator::new(CacheVersion::new("v6"), Arc::new(storage.clone()), Clients::new());

        activator.activate().await;

        assert!(storage.keys().await.unwrap().is_empty());
    }
}
