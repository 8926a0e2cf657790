//! Test doubles shared by the module tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{CacheError, Result};
use crate::fetch::Fetcher;
use crate::request::Request;
use crate::response::NetworkResponse;

/// Route logs to the test harness. Use RUST_LOG to control verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone)]
enum Scripted {
    Respond(u16, Vec<u8>),
    Unreachable,
}

/// A network that answers from a script and counts every call.
/// URLs with no script entry are unreachable.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    routes: Arc<Mutex<HashMap<String, Scripted>>>,
    calls: Arc<AtomicUsize>,
    per_url: Arc<Mutex<HashMap<String, usize>>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.set(url, status, body);
        self
    }

    pub fn set(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Scripted::Respond(status, body.into()));
    }

    /// Take a URL offline
    pub fn unreachable(&self, url: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Scripted::Unreachable);
    }

    /// Take the whole network offline
    pub fn go_offline(&self) {
        for route in self.routes.lock().unwrap().values_mut() {
            *route = Scripted::Unreachable;
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.per_url.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<NetworkResponse> {
        let url = request.url.to_string();
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.per_url.lock().unwrap().entry(url.clone()).or_default() += 1;

        let scripted = self.routes.lock().unwrap().get(&url).cloned();
        match scripted {
            Some(Scripted::Respond(status, body)) => Ok(NetworkResponse::new(url, status, body)),
            Some(Scripted::Unreachable) | None => Err(CacheError::Transport(format!("unreachable: {}", url))),
        }
    }
}
