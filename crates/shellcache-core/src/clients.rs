//! Registry of open client sessions and the cache version controlling each.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::manifest::CacheVersion;

pub type ClientId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub id: ClientId,
    pub url: String,
    /// Version whose worker answers this session's requests, if any
    pub controller: Option<CacheVersion>,
}

/// Shared between the host and every worker version it runs.
/// Clone is cheap - clones share the same registry.
#[derive(Clone, Default)]
pub struct Clients {
    sessions: Arc<RwLock<HashMap<ClientId, ClientSession>>>,
    next_id: Arc<AtomicU64>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly opened, uncontrolled session
    pub async fn open(&self, url: impl Into<String>) -> ClientId {
        self.open_controlled(url, None).await
    }

    pub async fn open_controlled(
        &self,
        url: impl Into<String>,
        controller: Option<CacheVersion>,
    ) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let session = ClientSession {
            id,
            url: url.into(),
            controller,
        };
        self.sessions.write().await.insert(id, session);
        id
    }

    pub async fn close(&self, id: ClientId) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn get(&self, id: ClientId) -> Option<ClientSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn controller(&self, id: ClientId) -> Option<CacheVersion> {
        self.sessions
            .read()
            .await
            .get(&id)
            .and_then(|s| s.controller.clone())
    }

    /// Sessions controlled by some version other than `version`
    pub async fn controlled_by_other(&self, version: &CacheVersion) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.controller.as_ref().is_some_and(|c| c != version))
            .count()
    }

    /// Make `version` the controller of every open session.
    /// Returns the number of sessions whose controller changed.
    pub async fn claim(&self, version: &CacheVersion) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut claimed = 0;
        for session in sessions.values_mut() {
            if session.controller.as_ref() != Some(version) {
                session.controller = Some(version.clone());
                claimed += 1;
            }
        }
        claimed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
