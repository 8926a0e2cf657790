//! The declared list of assets to pre-populate on install.
//!
//! Entries are ordered. Each one is flagged critical or not, so the critical
//! subset is always contained in the full manifest.

use std::fmt;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Opaque label naming one cache generation. Also used as the store name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheVersion(String);

impl CacheVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheVersion {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    #[serde(default)]
    pub critical: bool,
}

impl ManifestEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            critical: false,
        }
    }

    pub fn critical(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            critical: true,
        }
    }
}

/// A manifest entry resolved against the application origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub path: String,
    pub url: Url,
    pub critical: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ManifestEntry>", into = "Vec<ManifestEntry>")]
pub struct AssetManifest {
    entries: Vec<ManifestEntry>,
}

impl AssetManifest {
    /// Build a manifest, collapsing duplicate paths.
    /// The first occurrence keeps its position; a path is critical if any occurrence is.
    pub fn new(entries: impl IntoIterator<Item = ManifestEntry>) -> Self {
        let mut deduped: Vec<ManifestEntry> = Vec::new();
        for entry in entries {
            match deduped.iter_mut().find(|e| e.path == entry.path) {
                Some(existing) => existing.critical |= entry.critical,
                None => deduped.push(entry),
            }
        }
        Self { entries: deduped }
    }

    /// Build from a full list plus its critical subset.
    /// Every critical path must also appear in the full list.
    pub fn from_paths<A, C>(all: &[A], critical: &[C]) -> Result<Self>
    where
        A: AsRef<str>,
        C: AsRef<str>,
    {
        if let Some(stray) = critical
            .iter()
            .map(AsRef::as_ref)
            .find(|c| !all.iter().any(|a| a.as_ref() == *c))
        {
            return Err(CacheError::Manifest(format!(
                "critical asset '{}' is not in the manifest",
                stray
            )));
        }

        let is_critical = |path: &str| critical.iter().any(|c| c.as_ref() == path);
        Ok(Self::new(all.iter().map(|a| ManifestEntry {
            path: a.as_ref().to_string(),
            critical: is_critical(a.as_ref()),
        })))
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn critical(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.critical)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }

    /// Resolve every entry against the application origin, keeping manifest order.
    pub fn resolve(&self, base: &Url) -> Result<Vec<Asset>> {
        self.entries
            .iter()
            .map(|entry| {
                if entry.path.trim().is_empty() {
                    return Err(CacheError::Manifest("empty asset path".to_string()));
                }
                let url = base
                    .join(&entry.path)
                    .map_err(|e| CacheError::InvalidUrl(format!("{}: {}", entry.path, e)))?;
                Ok(Asset {
                    path: entry.path.clone(),
                    url,
                    critical: entry.critical,
                })
            })
            .collect()
    }
}

impl From<Vec<ManifestEntry>> for AssetManifest {
    fn from(entries: Vec<ManifestEntry>) -> Self {
        Self::new(entries)
    }
}

impl From<AssetManifest> for Vec<ManifestEntry> {
    fn from(manifest: AssetManifest) -> Self {
        manifest.entries
    }
}
