//! Directory-backed store namespace.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<store-id>/store.json        store name + creation time
//! <root>/<store-id>/<digest>.entry    one file per entry
//! ```
//!
//! An entry file is a 4-byte big-endian header length, the JSON header
//! (request key + response metadata), then the raw body. The whole entry is
//! published by a single rename, so readers and racing writers only ever see
//! complete snapshots.
//!
//! `store-id` and `digest` are SHA-256 hex digests, so arbitrary store names
//! and URLs never reach the filesystem.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{CacheHandle, CacheStorage};
use crate::error::Result;
use crate::request::RequestKey;
use crate::response::StoredResponse;

/// Store metadata file name inside each store directory
const STORE_FILE: &str = "store.json";

const ENTRY_EXT: &str = "entry";

/// Size of the header length prefix in an entry file
const HEADER_LEN_BYTES: usize = 4;

/// Disambiguates temp files when two writers race on the same entry.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct StoreMeta {
    name: String,
    created_at: DateTime<Utc>,
}

/// Entry header; the body follows it in the same file.
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    key: RequestKey,
    response: StoredResponse,
}

fn encode_entry(header: &EntryHeader, body: &[u8]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(header)?;
    let len = u32::try_from(json.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidData, "cache entry header too large"))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN_BYTES + json.len() + body.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    bytes.extend_from_slice(body);
    Ok(bytes)
}

fn decode_entry(bytes: &[u8]) -> Result<(EntryHeader, &[u8])> {
    let truncated = || io::Error::new(ErrorKind::InvalidData, "truncated cache entry");
    let (len, rest) = bytes
        .split_first_chunk::<HEADER_LEN_BYTES>()
        .ok_or_else(truncated)?;
    let len = u32::from_be_bytes(*len) as usize;
    if rest.len() < len {
        return Err(truncated().into());
    }
    let (json, body) = rest.split_at(len);
    Ok((serde_json::from_slice(json)?, body))
}

#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        let digest = Sha256::digest(name.as_bytes());
        self.root.join(hex::encode(digest))
    }

    async fn read_meta(dir: &Path) -> Result<Option<StoreMeta>> {
        match tokio::fs::read(dir.join(STORE_FILE)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheHandle>> {
        let dir = self.store_dir(name);
        if Self::read_meta(&dir).await?.is_none() {
            tokio::fs::create_dir_all(&dir).await?;
            let meta = StoreMeta {
                name: name.to_string(),
                created_at: Utc::now(),
            };
            write_atomic(&dir.join(STORE_FILE), &serde_json::to_vec_pretty(&meta)?).await?;
            debug!(store = name, path = ?dir, "Created cache store");
        }

        let handle: Arc<dyn CacheHandle> = Arc::new(DiskCache {
            name: name.to_string(),
            dir,
        });
        Ok(handle)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(Self::read_meta(&self.store_dir(name)).await?.is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut stores = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match Self::read_meta(&entry.path()).await {
                Ok(Some(meta)) => stores.push(meta),
                Ok(None) => {}
                Err(e) => {
                    debug!(path = ?entry.path(), error = %e, "Skipping unreadable store directory");
                }
            }
        }
        stores.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(stores.into_iter().map(|m| m.name).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.store_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// A single on-disk store.
///
/// Handles outlive deletion of their store: writes after deletion fail with
/// `Storage` rather than recreating the directory.
pub struct DiskCache {
    name: String,
    dir: PathBuf,
}

impl DiskCache {
    fn entry_path(&self, key: &RequestKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.digest(), ENTRY_EXT))
    }
}

#[async_trait]
impl CacheHandle for DiskCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<StoredResponse>> {
        let bytes = match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (header, body) = decode_entry(&bytes)?;

        let mut response = header.response;
        response.body = body.to_vec();
        Ok(Some(response))
    }

    async fn put(&self, key: RequestKey, response: StoredResponse) -> Result<()> {
        if !tokio::fs::try_exists(self.dir.join(STORE_FILE)).await? {
            return Err(io::Error::new(
                ErrorKind::NotFound,
                format!("cache store '{}' no longer exists", self.name),
            )
            .into());
        }

        let path = self.entry_path(&key);
        let header = EntryHeader { key, response };
        write_atomic(&path, &encode_entry(&header, &header.response.body)?).await
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<RequestKey>> {
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == ENTRY_EXT) {
                continue;
            }
            let header = match tokio::fs::read(&path).await {
                Ok(bytes) => decode_entry(&bytes).map(|(header, _)| header),
                // Deleted since the directory listing
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => Err(e.into()),
            };
            match header {
                Ok(header) => keys.push(header.key),
                Err(e) => {
                    debug!(store = %self.name, path = ?path, error = %e, "Skipping unreadable cache entry");
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("tmp{}.{}", std::process::id(), n));
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
