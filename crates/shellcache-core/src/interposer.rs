//! Fetch interposition: read-through with fill-on-miss.
//!
//! For every eligible request:
//! 1. look the request up in the current version's store
//! 2. on a hit, answer with the stored entry as-is (no revalidation)
//! 3. on a miss, fetch from the network, store a copy, answer with the other copy
//!
//! Two concurrent misses for the same request both fetch and both write;
//! the last write wins.

use std::sync::Arc;

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{CacheError, Result};
use crate::fetch::Fetcher;
use crate::manifest::CacheVersion;
use crate::request::{Request, RequestKey};
use crate::response::{NetworkResponse, ServedResponse};
use crate::storage::CacheStorage;

/// Which network responses are written to the store on a miss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorePolicy {
    /// Only 2xx responses; error pages are returned but never stored
    #[default]
    SuccessOnly,
    /// Every response, including 404s and 500s
    Unconditional,
}

impl StorePolicy {
    pub fn should_store(&self, response: &NetworkResponse) -> bool {
        match self {
            StorePolicy::SuccessOnly => response.is_success(),
            StorePolicy::Unconditional => true,
        }
    }
}

/// What the layer did with a request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not eligible; the client's default handling applies
    PassThrough,
    Respond(ServedResponse),
    /// Intercepted but no response could be produced
    Failed(CacheError),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&ServedResponse> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            _ => None,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, FetchOutcome::PassThrough)
    }
}

pub struct Interposer {
    version: CacheVersion,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    policy: StorePolicy,
    offline_fallback: Option<RequestKey>,
}

impl Interposer {
    pub fn new(version: CacheVersion, storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            version,
            storage,
            fetcher,
            policy: StorePolicy::default(),
            offline_fallback: None,
        }
    }

    pub fn with_policy(mut self, policy: StorePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Serve this (normally pre-cached) page to failed page loads.
    pub fn with_offline_fallback(mut self, url: &Url) -> Self {
        self.offline_fallback = Some(RequestKey::new(&Method::GET, url));
        self
    }

    /// Handle one request end to end.
    pub async fn handle(&self, request: &Request) -> FetchOutcome {
        if !request.is_interceptable() {
            return FetchOutcome::PassThrough;
        }

        match self.respond(request).await {
            Ok(response) => FetchOutcome::Respond(response),
            Err(e) => {
                error!(url = %request.url, error = %e, "Fetch failed");
                match self.fallback_for(request).await {
                    Some(page) => FetchOutcome::Respond(page),
                    None => FetchOutcome::Failed(e),
                }
            }
        }
    }

    /// Read-through with fill; only reached through `handle`'s eligibility check.
    async fn respond(&self, request: &Request) -> Result<ServedResponse> {
        let cache = self.storage.open(self.version.as_str()).await?;
        let key = request.key();

        if let Some(hit) = cache.get(&key).await? {
            debug!(key = %key, "Cache hit");
            return Ok(ServedResponse::from_cache(hit));
        }

        debug!(key = %key, "Cache miss, fetching from network");
        let network = self.fetcher.fetch(request).await?;

        if !self.policy.should_store(&network) {
            debug!(key = %key, status = network.status, "Not caching unsuccessful response");
            return Ok(ServedResponse::from_network(network.into_snapshot()));
        }

        // The body could only be read once; both consumers get their own copy
        let (stored, caller) = network.split();
        if let Err(e) = cache.put(key.clone(), stored).await {
            warn!(key = %key, error = %e, "Failed to cache network response");
        }
        Ok(ServedResponse::from_network(caller))
    }

    /// Only page loads (requests accepting HTML) get the fallback page.
    async fn fallback_for(&self, request: &Request) -> Option<ServedResponse> {
        let fallback = self.offline_fallback.as_ref()?;
        let wants_html = request
            .headers
            .iter()
            .any(|(name, value)| name.eq_ignore_ascii_case("accept") && value.contains("text/html"));
        if !wants_html {
            return None;
        }

        let cache = self.storage.open(self.version.as_str()).await.ok()?;
        match cache.get(fallback).await {
            Ok(Some(page)) => {
                debug!(url = %request.url, fallback = %fallback, "Serving offline fallback");
                Some(ServedResponse::fallback(page))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(fallback = %fallback, error = %e, "Failed to read offline fallback");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{ResponseSource, StoredResponse};
    use crate::storage::{CacheHandle, MemoryStorage};
    use crate::testing::{init_tracing, ScriptedFetcher};
    use async_trait::async_trait;

    const DATA_URL: &str = "https://app.test/data.json";

    fn interposer(storage: &MemoryStorage, fetcher: &ScriptedFetcher) -> Interposer {
        Interposer::new(
            CacheVersion::new("v6"),
            Arc::new(storage.clone()),
            Arc::new(fetcher.clone()),
        )
    }

    #[tokio::test]
    async fn test_miss_then_hit_without_network() {
        init_tracing();
        let fetcher = ScriptedFetcher::new().respond(DATA_URL, 200, br#"{"a":1}"#.to_vec());
        let storage = MemoryStorage::new();
        let interposer = interposer(&storage, &fetcher);
        let request = Request::get(DATA_URL).unwrap();

        let first = interposer.handle(&request).await;
        let first = first.response().expect("network response");
        assert_eq!(first.source, ResponseSource::Network);
        assert_eq!(first.body(), br#"{"a":1}"#);
        assert_eq!(fetcher.calls(), 1);

        fetcher.go_offline();
        let second = interposer.handle(&request).await;
        let second = second.response().expect("cached response");
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.body(), br#"{"a":1}"#);
        assert_eq!(second.status(), 200);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_hit_is_never_revalidated() {
        let fetcher = ScriptedFetcher::new().respond(DATA_URL, 200, b"first".to_vec());
        let storage = MemoryStorage::new();
        let interposer = interposer(&storage, &fetcher);
        let request = Request::get(DATA_URL).unwrap();

        interposer.handle(&request).await;
        fetcher.set(DATA_URL, 200, b"second".to_vec());

        for _ in 0..3 {
            let outcome = interposer.handle(&request).await;
            assert_eq!(outcome.response().unwrap().body(), b"first");
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_ineligible_requests_pass_through_untouched() {
        let fetcher = ScriptedFetcher::new().respond(DATA_URL, 200, b"x".to_vec());
        let storage = MemoryStorage::new();
        let interposer = interposer(&storage, &fetcher);

        let post = Request::new(Method::POST, Url::parse(DATA_URL).unwrap());
        let data = Request::get("data:text/plain,hello").unwrap();
        let extension = Request::get("chrome-extension://abcdef/popup.html").unwrap();

        for request in [&post, &data, &extension] {
            assert!(interposer.handle(request).await.is_pass_through());
        }

        assert_eq!(fetcher.calls(), 0);
        // Nothing was even opened on their behalf
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_network_failure_fails_request() {
        let fetcher = ScriptedFetcher::new();
        let storage = MemoryStorage::new();
        let interposer = interposer(&storage, &fetcher);

        let outcome = interposer.handle(&Request::get(DATA_URL).unwrap()).await;
        match outcome {
            FetchOutcome::Failed(e) => assert!(e.is_network()),
            other => panic!("expected failure, got {other:?}"),
        }
        let cache = storage.open("v6").await.unwrap();
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_status_returned_but_not_stored_by_default() {
        let fetcher = ScriptedFetcher::new().respond(DATA_URL, 404, b"nope".to_vec());
        let storage = MemoryStorage::new();
        let interposer = interposer(&storage, &fetcher);
        let request = Request::get(DATA_URL).unwrap();

        let outcome = interposer.handle(&request).await;
        assert_eq!(outcome.response().unwrap().status(), 404);

        interposer.handle(&request).await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_unconditional_policy_stores_error_status() {
        let fetcher = ScriptedFetcher::new().respond(DATA_URL, 404, b"nope".to_vec());
        let storage = MemoryStorage::new();
        let interposer = interposer(&storage, &fetcher).with_policy(StorePolicy::Unconditional);
        let request = Request::get(DATA_URL).unwrap();

        interposer.handle(&request).await;
        let again = interposer.handle(&request).await;

        assert_eq!(again.response().unwrap().source, ResponseSource::Cache);
        assert_eq!(again.response().unwrap().status(), 404);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_offline_fallback_for_page_loads_only() {
        let fetcher = ScriptedFetcher::new();
        let storage = MemoryStorage::new();
        let offline = Url::parse("https://app.test/offline.html").unwrap();
        storage
            .open("v6")
            .await
            .unwrap()
            .put(
                RequestKey::new(&Method::GET, &offline),
                StoredResponse::new(offline.as_str(), 200, b"offline".to_vec()),
            )
            .await
            .unwrap();
        let interposer = interposer(&storage, &fetcher).with_offline_fallback(&offline);

        let page = Request::get("https://app.test/lobby").unwrap().with_header("Accept", "text/html,*/*");
        let outcome = interposer.handle(&page).await;
        let served = outcome.response().expect("fallback page");
        assert_eq!(served.source, ResponseSource::Fallback);
        assert_eq!(served.body(), b"offline");

        let image = Request::get("https://app.test/avatar.png").unwrap().with_header("Accept", "image/*");
        assert!(matches!(interposer.handle(&image).await, FetchOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_entry() {
        let fetcher = ScriptedFetcher::new().respond(DATA_URL, 200, b"same".to_vec());
        let storage = MemoryStorage::new();
        let interposer = interposer(&storage, &fetcher);
        let request = Request::get(DATA_URL).unwrap();

        let (a, b) = tokio::join!(interposer.handle(&request), interposer.handle(&request));
        assert_eq!(a.response().unwrap().body(), b"same");
        assert_eq!(b.response().unwrap().body(), b"same");

        let cache = storage.open("v6").await.unwrap();
        assert_eq!(cache.keys().await.unwrap().len(), 1);
    }

    /// Store that accepts reads but rejects writes
    struct ReadOnlyStorage(MemoryStorage);

    struct ReadOnlyCache(Arc<dyn CacheHandle>);

    #[async_trait]
    impl CacheStorage for ReadOnlyStorage {
        async fn open(&self, name: &str) -> Result<Arc<dyn CacheHandle>> {
            let handle: Arc<dyn CacheHandle> = Arc::new(ReadOnlyCache(self.0.open(name).await?));
            Ok(handle)
        }
        async fn has(&self, name: &str) -> Result<bool> {
            self.0.has(name).await
        }
        async fn keys(&self) -> Result<Vec<String>> {
            self.0.keys().await
        }
        async fn delete(&self, name: &str) -> Result<bool> {
            self.0.delete(name).await
        }
    }

    #[async_trait]
    impl CacheHandle for ReadOnlyCache {
        fn name(&self) -> &str {
            self.0.name()
        }
        async fn get(&self, key: &RequestKey) -> Result<Option<StoredResponse>> {
            self.0.get(key).await
        }
        async fn put(&self, _key: RequestKey, _response: StoredResponse) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "quota exceeded").into())
        }
        async fn delete(&self, key: &RequestKey) -> Result<bool> {
            self.0.delete(key).await
        }
        async fn keys(&self) -> Result<Vec<RequestKey>> {
            self.0.keys().await
        }
    }

    #[tokio::test]
    async fn test_store_write_failure_still_answers() {
        let fetcher = ScriptedFetcher::new().respond(DATA_URL, 200, b"fresh".to_vec());
        let storage = ReadOnlyStorage(MemoryStorage::new());
        let interposer = Interposer::new(CacheVersion::new("v6"), Arc::new(storage), Arc::new(fetcher.clone()));

        let outcome = interposer.handle(&Request::get(DATA_URL).unwrap()).await;
        assert_eq!(outcome.response().unwrap().body(), b"fresh");
    }
}
