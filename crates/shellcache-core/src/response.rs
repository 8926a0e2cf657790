//! Response snapshots: what the network returned, what the store keeps,
//! and what the caller receives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time snapshot of a response, as kept in a cache store.
///
/// The body is held in memory; stores decide how to persist it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            status_text: String::new(),
            headers: Vec::new(),
            body: body.into(),
            stored_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A network response whose body stream has been read to the end.
///
/// The body can only be consumed once upstream, so the fetcher buffers it and
/// `split` hands out two independent copies: one for the store, one for the caller.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl NetworkResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            status_text: String::new(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns `(for_store, for_caller)`.
    pub fn split(self) -> (StoredResponse, StoredResponse) {
        let caller = self.into_snapshot();
        let stored = caller.clone();
        (stored, caller)
    }

    pub fn into_snapshot(self) -> StoredResponse {
        StoredResponse {
            url: self.url,
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            body: self.body,
            stored_at: Utc::now(),
        }
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// The configured offline page, served in place of a failed request
    Fallback,
}

/// The response handed back to the client for an intercepted request.
#[derive(Debug, Clone)]
pub struct ServedResponse {
    pub source: ResponseSource,
    pub response: StoredResponse,
}

impl ServedResponse {
    pub fn from_cache(response: StoredResponse) -> Self {
        Self {
            source: ResponseSource::Cache,
            response,
        }
    }

    pub fn from_network(response: StoredResponse) -> Self {
        Self {
            source: ResponseSource::Network,
            response,
        }
    }

    pub fn fallback(response: StoredResponse) -> Self {
        Self {
            source: ResponseSource::Fallback,
            response,
        }
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn body(&self) -> &[u8] {
        &self.response.body
    }
}
