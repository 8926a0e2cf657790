//! Cache configuration: the version identifier and the asset manifest.
//!
//! Both are compiled in through `Config::default()`. A JSON override may be
//! stored at `~/.config/shellcache/config.json`; stores live under the
//! platform cache directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CacheError;
use crate::fetch::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::interposer::StorePolicy;
use crate::manifest::{AssetManifest, CacheVersion, ManifestEntry};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "shellcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Subdirectory of the cache directory holding the versioned stores
const STORES_DIR: &str = "stores";

/// Bump whenever the manifest changes incompatibly
const DEFAULT_VERSION: &str = "app-shell-cache-v6";

const DEFAULT_BASE_URL: &str = "http://localhost:8080/";

/// Needed to render the shell at all
const CRITICAL_ASSETS: &[&str] = &["./", "index.html", "index.js", "app.js"];

const SHELL_ASSETS: &[&str] = &[
    "./",
    "index.html",
    "index.js",
    "app.js",
    "manifest.json",
    "styles.css",
    "splash.png",
    "icons/icon-192x192.png",
    "icons/icon-512x512.png",
    "offline.html",
];

const DEFAULT_OFFLINE_FALLBACK: &str = "offline.html";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: CacheVersion,
    /// Origin the manifest paths are relative to
    pub base_url: String,
    pub manifest: AssetManifest,
    pub store_policy: StorePolicy,
    /// Manifest path served to page loads that fail offline
    pub offline_fallback: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let manifest = AssetManifest::new(SHELL_ASSETS.iter().map(|path| ManifestEntry {
            path: path.to_string(),
            critical: CRITICAL_ASSETS.contains(path),
        }));

        Self {
            version: CacheVersion::new(DEFAULT_VERSION),
            base_url: DEFAULT_BASE_URL.to_string(),
            manifest,
            store_policy: StorePolicy::default(),
            offline_fallback: Some(DEFAULT_OFFLINE_FALLBACK.to_string()),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load from the platform config directory, or the compiled-in defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Like `load`, but never fails: a broken override file falls back to defaults
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Root directory for `DiskStorage`
    pub fn store_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(STORES_DIR))
    }

    pub fn base_url(&self) -> std::result::Result<Url, CacheError> {
        Url::parse(&self.base_url)
            .map_err(|e| CacheError::InvalidUrl(format!("{}: {}", self.base_url, e)))
    }

    /// Absolute URL of the offline fallback page, if one is configured
    pub fn offline_fallback_url(&self) -> std::result::Result<Option<Url>, CacheError> {
        let Some(path) = self.offline_fallback.as_deref() else {
            return Ok(None);
        };
        let url = self
            .base_url()?
            .join(path)
            .map_err(|e| CacheError::InvalidUrl(format!("{}: {}", path, e)))?;
        Ok(Some(url))
    }
}
