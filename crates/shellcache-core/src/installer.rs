//! Install step: populate a version's store from the asset manifest.
//!
//! Nothing here is fatal. A store that cannot be opened, a critical asset that
//! 404s, an unreachable host: all are logged and recorded in the report, and
//! the install still completes so the version can become installable.

use std::sync::Arc;

use futures::future::join_all;
use reqwest::{Method, Url};
use tracing::{debug, error, info, warn};

use crate::error::{CacheError, Result};
use crate::fetch::Fetcher;
use crate::manifest::{Asset, AssetManifest, CacheVersion};
use crate::request::Request;
use crate::storage::{CacheHandle, CacheStorage};

/// An asset that could not be stored
#[derive(Debug)]
pub struct AssetFailure {
    pub path: String,
    pub error: CacheError,
}

#[derive(Debug)]
pub struct InstallReport {
    pub version: CacheVersion,
    /// Manifest paths now present in the store, in the order they were stored
    pub stored: Vec<String>,
    pub critical_failures: Vec<AssetFailure>,
    /// Failures from the full-manifest pass
    pub failures: Vec<AssetFailure>,
    /// Set when the store could not be opened or the manifest did not resolve
    pub setup_error: Option<CacheError>,
    /// Request to activate without waiting for existing clients to close
    pub skip_waiting: bool,
}

impl InstallReport {
    fn new(version: CacheVersion) -> Self {
        Self {
            version,
            stored: Vec::new(),
            critical_failures: Vec::new(),
            failures: Vec::new(),
            setup_error: None,
            skip_waiting: false,
        }
    }

    /// True when every manifest asset made it into the store
    pub fn is_complete(&self) -> bool {
        self.setup_error.is_none() && self.critical_failures.is_empty() && self.failures.is_empty()
    }

    pub fn is_stored(&self, path: &str) -> bool {
        self.stored.iter().any(|p| p == path)
    }
}

pub struct Installer {
    version: CacheVersion,
    base_url: Url,
    manifest: AssetManifest,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl Installer {
    pub fn new(
        version: CacheVersion,
        base_url: Url,
        manifest: AssetManifest,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            version,
            base_url,
            manifest,
            storage,
            fetcher,
        }
    }

    /// Run the install. Always completes; inspect the report for what was cached.
    pub async fn install(&self) -> InstallReport {
        let mut report = InstallReport::new(self.version.clone());
        info!(version = %self.version, assets = self.manifest.len(), "Installing cache version");

        self.populate_store(&mut report).await;

        // Issued whatever happened above: a partial shell beats no shell
        report.skip_waiting = true;

        info!(
            version = %self.version,
            stored = report.stored.len(),
            critical_failures = report.critical_failures.len(),
            failures = report.failures.len(),
            "Install complete"
        );
        report
    }

    async fn populate_store(&self, report: &mut InstallReport) {
        let assets = match self.manifest.resolve(&self.base_url) {
            Ok(assets) => assets,
            Err(e) => {
                error!(version = %self.version, error = %e, "Failed to resolve asset manifest");
                report.setup_error = Some(e);
                return;
            }
        };

        let cache = match self.storage.open(self.version.as_str()).await {
            Ok(cache) => cache,
            Err(e) => {
                error!(version = %self.version, error = %e, "Failed to open cache store for app shell");
                report.setup_error = Some(e);
                return;
            }
        };

        // Critical subset first
        let critical: Vec<&Asset> = assets.iter().filter(|a| a.critical).collect();
        for (asset, result) in self.add_all(&*cache, &critical).await {
            match result {
                Ok(()) => report.stored.push(asset.path.clone()),
                Err(e) => {
                    warn!(path = %asset.path, error = %e, "Failed to cache critical asset");
                    report.critical_failures.push(AssetFailure {
                        path: asset.path.clone(),
                        error: e,
                    });
                }
            }
        }
        if !report.critical_failures.is_empty() {
            warn!(
                failed = report.critical_failures.len(),
                total = critical.len(),
                "Caching critical app shell failed, but proceeding"
            );
        }

        // Then the full manifest, minus what is already stored
        let remaining: Vec<&Asset> = assets
            .iter()
            .filter(|a| !report.is_stored(&a.path))
            .collect();
        for (asset, result) in self.add_all(&*cache, &remaining).await {
            match result {
                Ok(()) => report.stored.push(asset.path.clone()),
                Err(e) => {
                    debug!(path = %asset.path, error = %e, "Failed to cache asset");
                    report.failures.push(AssetFailure {
                        path: asset.path.clone(),
                        error: e,
                    });
                }
            }
        }
        if !report.failures.is_empty() {
            warn!(
                failed = report.failures.len(),
                total = assets.len(),
                "Caching non-critical assets failed, but proceeding"
            );
        }
    }

    /// Fetch and store each asset concurrently. Each asset succeeds or fails
    /// on its own; one failure never discards its siblings.
    async fn add_all<'a>(
        &self,
        cache: &dyn CacheHandle,
        assets: &[&'a Asset],
    ) -> Vec<(&'a Asset, Result<()>)> {
        let futures: Vec<_> = assets
            .iter()
            .map(|&asset| async move { (asset, self.add(cache, asset).await) })
            .collect();
        join_all(futures).await
    }

    async fn add(&self, cache: &dyn CacheHandle, asset: &Asset) -> Result<()> {
        let request = Request::new(Method::GET, asset.url.clone());
        let response = self.fetcher.fetch(&request).await?;
        if !response.is_success() {
            return Err(CacheError::from_status(asset.url.as_str(), response.status));
        }
        cache.put(request.key(), response.into_snapshot()).await
    }
}
