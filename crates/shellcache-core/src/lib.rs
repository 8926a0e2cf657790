//! Versioned offline asset cache.
//!
//! Serves a web client's resource requests from a local, versioned store when
//! possible, falling back to the network and filling the store on a miss, so
//! the application shell keeps rendering without connectivity.
//!
//! Modules:
//! - `storage`: named stores (`MemoryStorage`, `DiskStorage`)
//! - `fetch`: network access (`HttpFetcher`)
//! - `installer`: populate a version's store from the asset manifest
//! - `activator`: delete stale versions' stores and claim open clients
//! - `interposer`: read-through with fill-on-miss for eligible requests
//! - `worker`: lifecycle state and event dispatch tying the three together
//!
//! Failures local to one asset, one stale store or one request are logged and
//! contained; none of them abort an install or activate event.

pub mod activator;
pub mod clients;
pub mod config;
pub mod error;
pub mod fetch;
pub mod installer;
pub mod interposer;
pub mod manifest;
pub mod request;
pub mod response;
pub mod storage;
pub mod worker;

#[cfg(test)]
mod testing;

pub use activator::{ActivationReport, Activator};
pub use clients::{ClientId, ClientSession, Clients};
pub use config::Config;
pub use error::{CacheError, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use installer::{AssetFailure, InstallReport, Installer};
pub use interposer::{FetchOutcome, Interposer, StorePolicy};
pub use manifest::{Asset, AssetManifest, CacheVersion, ManifestEntry};
pub use request::{Request, RequestKey};
pub use response::{NetworkResponse, ResponseSource, ServedResponse, StoredResponse};
pub use storage::{CacheHandle, CacheStorage, DiskStorage, MemoryStorage};
pub use worker::{EventOutcome, FetchEvent, LifecycleEvent, ServiceWorker, WorkerState};
