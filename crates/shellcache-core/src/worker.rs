//! The worker for one cache version: lifecycle state plus event dispatch.
//!
//! The host delivers three kinds of events:
//! - `Install`: populate this version's store (once per version)
//! - `Activate`: purge other versions' stores and claim open clients (once per cutover)
//! - `Fetch`: one per outbound client request, for as long as this version is active
//!
//! Every handler future resolves only once its work is done, so awaiting it
//! holds the event open. Fetches may be spawned as independent tasks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::activator::{ActivationReport, Activator};
use crate::clients::{ClientId, Clients};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::installer::{InstallReport, Installer};
use crate::interposer::{FetchOutcome, Interposer};
use crate::manifest::CacheVersion;
use crate::request::Request;
use crate::storage::{CacheStorage, DiskStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

/// A request intercepted on behalf of a client session.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// The session issuing the request; `None` for a page load not yet bound to one
    pub client_id: Option<ClientId>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }

    pub fn from_client(request: Request, client_id: ClientId) -> Self {
        Self {
            request,
            client_id: Some(client_id),
        }
    }
}

#[derive(Debug)]
pub enum LifecycleEvent {
    Install,
    Activate,
    Fetch(FetchEvent),
}

#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivationReport),
    Fetched(FetchOutcome),
}

fn lock_state(state: &Mutex<WorkerState>) -> MutexGuard<'_, WorkerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-progress lifecycle step. Dropped without `finish` (the event future
/// was cancelled), it puts the previous state back.
struct Transition<'a> {
    state: &'a Mutex<WorkerState>,
    previous: WorkerState,
    finished: bool,
}

impl Transition<'_> {
    fn finish(mut self, next: WorkerState) {
        *lock_state(self.state) = next;
        self.finished = true;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut state = lock_state(self.state);
            warn!(from = ?*state, to = ?self.previous, "Lifecycle event abandoned, restoring state");
            *state = self.previous;
        }
    }
}

pub struct ServiceWorker {
    version: CacheVersion,
    clients: Clients,
    installer: Installer,
    activator: Activator,
    interposer: Interposer,
    state: Mutex<WorkerState>,
}

impl ServiceWorker {
    pub fn new(
        config: &Config,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Clients,
    ) -> Result<Self> {
        let version = config.version.clone();
        let base_url = config.base_url()?;

        let installer = Installer::new(
            version.clone(),
            base_url,
            config.manifest.clone(),
            storage.clone(),
            fetcher.clone(),
        );
        let activator = Activator::new(version.clone(), storage.clone(), clients.clone());
        let mut interposer =
            Interposer::new(version.clone(), storage, fetcher).with_policy(config.store_policy);
        if let Some(url) = config.offline_fallback_url()? {
            interposer = interposer.with_offline_fallback(&url);
        }

        Ok(Self {
            version,
            clients,
            installer,
            activator,
            interposer,
            state: Mutex::new(WorkerState::Parsed),
        })
    }

    /// Worker over the on-disk stores and the real network
    pub fn from_config(config: &Config, clients: Clients) -> anyhow::Result<Self> {
        let storage = DiskStorage::new(config.store_dir()?)?;
        let fetcher = HttpFetcher::with_timeout(Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self::new(config, Arc::new(storage), Arc::new(fetcher), clients)?)
    }

    pub fn version(&self) -> &CacheVersion {
        &self.version
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn state(&self) -> WorkerState {
        *lock_state(&self.state)
    }

    fn begin(
        &self,
        action: &'static str,
        allowed: &[WorkerState],
        next: WorkerState,
    ) -> Result<Transition<'_>> {
        let mut state = lock_state(&self.state);
        if !allowed.contains(&*state) {
            return Err(CacheError::InvalidState {
                action,
                state: *state,
            });
        }
        debug!(version = %self.version, from = ?*state, to = ?next, "Worker state change");
        let previous = std::mem::replace(&mut *state, next);
        Ok(Transition {
            state: &self.state,
            previous,
            finished: false,
        })
    }

    /// Handle the install event. Repeat triggers are allowed; an active
    /// version repopulates its store in place and stays active.
    pub async fn install(&self) -> Result<InstallReport> {
        if self.state() == WorkerState::Activated {
            debug!(version = %self.version, "Repeat install on active version");
            return Ok(self.installer.install().await);
        }

        let transition = self.begin(
            "install",
            &[WorkerState::Parsed, WorkerState::Installed],
            WorkerState::Installing,
        )?;
        let report = self.installer.install().await;
        transition.finish(WorkerState::Installed);
        if report.skip_waiting {
            info!(version = %self.version, "Skipping wait, ready to activate");
        }
        Ok(report)
    }

    /// Handle the activate event: cleanup first, then claim clients.
    pub async fn activate(&self) -> Result<ActivationReport> {
        let transition = self.begin(
            "activate",
            &[WorkerState::Installed, WorkerState::Activated],
            WorkerState::Activating,
        )?;
        let report = self.activator.activate().await;
        transition.finish(WorkerState::Activated);
        Ok(report)
    }

    /// Handle one fetch event.
    ///
    /// Requests pass through unless this version is active and, for requests
    /// from a known session, that session is controlled by this version.
    pub async fn fetch(&self, event: &FetchEvent) -> FetchOutcome {
        if self.state() != WorkerState::Activated {
            return FetchOutcome::PassThrough;
        }
        if let Some(id) = event.client_id {
            if self.clients.controller(id).await.as_ref() != Some(&self.version) {
                return FetchOutcome::PassThrough;
            }
        }
        self.interposer.handle(&event.request).await
    }

    /// Handle a fetch event on its own task
    pub fn spawn_fetch(self: &Arc<Self>, event: FetchEvent) -> JoinHandle<FetchOutcome> {
        let worker = Arc::clone(self);
        tokio::spawn(async move { worker.fetch(&event).await })
    }

    pub async fn handle_event(&self, event: LifecycleEvent) -> Result<EventOutcome> {
        match event {
            LifecycleEvent::Install => self.install().await.map(EventOutcome::Installed),
            LifecycleEvent::Activate => self.activate().await.map(EventOutcome::Activated),
            LifecycleEvent::Fetch(fetch) => Ok(EventOutcome::Fetched(self.fetch(&fetch).await)),
        }
    }
}
