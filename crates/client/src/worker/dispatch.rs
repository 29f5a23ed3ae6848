//! Event dispatcher that plays the role of the worker runtime.
//!
//! Lifecycle and fetch events are routed to the [`LifecycleController`] and
//! [`FetchInterceptor`]. Fetches are controlled from the first successful
//! activation until a newer deployment deletes this worker's generation;
//! outside that window they go straight to the network.

use std::fmt;
use std::sync::Arc;

use offcache_core::{AppConfig, CacheStore, Error, GenerationId, RequestIdentity};
use serde::Serialize;
use tokio::sync::RwLock;
use url::Url;

use super::intercept::{FetchInterceptor, Intercepted};
use super::lifecycle::{ActivateOutcome, InstallOutcome, LifecycleController};
use crate::fetch::{Network, resolve};

/// Lifecycle position of a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Loaded but not yet installed, or the last install failed.
    Parsed,
    Installing,
    /// Installed and waiting to activate.
    Installed,
    Activating,
    /// Controlling every client; fetches go through the interceptor.
    Activated,
    /// Superseded by a newer deployment that removed this generation.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// External events the worker reacts to.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(RequestIdentity),
}

/// Reply to a dispatched [`WorkerEvent`].
#[derive(Debug)]
pub enum WorkerReply {
    Installed(InstallOutcome),
    Activated(ActivateOutcome),
    Response(Intercepted),
}

#[derive(Debug, Clone, Copy)]
struct Phase {
    state: WorkerState,
    /// Set by the first successful activation; a re-install keeps it.
    controlling: bool,
}

/// One deployed worker version.
#[derive(Clone)]
pub struct Worker {
    origin: Url,
    store: CacheStore,
    network: Arc<dyn Network>,
    lifecycle: LifecycleController,
    interceptor: FetchInterceptor,
    phase: Arc<RwLock<Phase>>,
}

impl Worker {
    /// Build a worker whose controller and interceptor share one generation id.
    pub fn new(
        origin: Url, store: CacheStore, network: Arc<dyn Network>, generation: GenerationId, assets: Vec<RequestIdentity>,
    ) -> Self {
        let lifecycle = LifecycleController::new(store.clone(), network.clone(), generation.clone(), assets);
        let interceptor = FetchInterceptor::new(store.clone(), network.clone(), generation);
        let phase = Phase { state: WorkerState::Parsed, controlling: false };
        Self { origin, store, network, lifecycle, interceptor, phase: Arc::new(RwLock::new(phase)) }
    }

    /// Build a worker from loaded configuration.
    ///
    /// # Errors
    ///
    /// Fails if the generation id cannot be derived or the origin or an
    /// asset path does not resolve.
    pub fn from_config(config: &AppConfig, store: CacheStore, network: Arc<dyn Network>) -> Result<Self, Error> {
        let generation = config.generation_id()?;
        let origin = Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(format!("{}: {e}", config.origin)))?;

        let assets = config
            .precache_assets
            .iter()
            .map(|path| {
                resolve(&origin, path)
                    .map(RequestIdentity::get)
                    .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let mut worker = Self::new(origin, store, network, generation, assets);
        worker.lifecycle = worker.lifecycle.with_concurrency(config.precache_concurrency);
        Ok(worker)
    }

    pub fn generation(&self) -> &GenerationId {
        self.lifecycle.generation()
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn interceptor(&self) -> &FetchInterceptor {
        &self.interceptor
    }

    pub async fn state(&self) -> WorkerState {
        self.phase.read().await.state
    }

    /// Whether intercepted requests currently go through the cache.
    pub async fn is_controlling(&self) -> bool {
        self.phase.read().await.controlling
    }

    /// Turn a path or absolute URL into a request identity against this worker's origin.
    pub fn request(&self, method: &str, target: &str) -> Result<RequestIdentity, Error> {
        if method.trim().is_empty() {
            return Err(Error::InvalidInput("method cannot be empty".into()));
        }
        let url = resolve(&self.origin, target).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(RequestIdentity::new(method, url))
    }

    /// Route an event to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<WorkerReply, Error> {
        match event {
            WorkerEvent::Install => self.install().await.map(WorkerReply::Installed),
            WorkerEvent::Activate => self.activate().await.map(WorkerReply::Activated),
            WorkerEvent::Fetch(request) => self.fetch(request).await.map(WorkerReply::Response),
        }
    }

    /// Load this version: install, then activate straight away since install skips waiting.
    pub async fn deploy(&self) -> Result<(InstallOutcome, ActivateOutcome), Error> {
        let installed = self.install().await?;
        let activated = self.activate().await?;
        Ok((installed, activated))
    }

    /// Populate the current generation.
    ///
    /// A failed install leaves the worker `Parsed` so a later load can retry.
    /// Re-installing an activated worker refreshes the generation and keeps it
    /// in control throughout.
    pub async fn install(&self) -> Result<InstallOutcome, Error> {
        let previous = {
            let mut phase = self.phase.write().await;
            let previous = phase.state;
            let busy = matches!(previous, WorkerState::Installing | WorkerState::Activating);
            if busy || self.superseded(&mut phase).await? {
                return Err(Error::InvalidState(format!("cannot install while {}", phase.state)));
            }
            phase.state = WorkerState::Installing;
            previous
        };

        let result = self.lifecycle.install().await;

        let mut phase = self.phase.write().await;
        phase.state = match (&result, previous) {
            (_, WorkerState::Activated) => WorkerState::Activated,
            (Ok(_), _) => WorkerState::Installed,
            (Err(_), _) => WorkerState::Parsed,
        };

        result
    }

    /// Retire stale generations and take control of all clients.
    pub async fn activate(&self) -> Result<ActivateOutcome, Error> {
        let previous = {
            let mut phase = self.phase.write().await;
            let previous = phase.state;
            let ready = matches!(previous, WorkerState::Installed | WorkerState::Activated);
            if !ready || self.superseded(&mut phase).await? {
                return Err(Error::InvalidState(format!("cannot activate while {}", phase.state)));
            }
            phase.state = WorkerState::Activating;
            previous
        };

        let result = self.lifecycle.activate().await;

        let mut phase = self.phase.write().await;
        if result.is_ok() {
            *phase = Phase { state: WorkerState::Activated, controlling: true };
        } else {
            phase.state = previous;
        }

        result
    }

    /// Handle an intercepted request.
    ///
    /// Before activation the request is not controlled and is passed to the
    /// network without reading or writing the cache. Once another deployment
    /// has deleted this worker's generation the worker becomes `Redundant` and
    /// passes everything through from then on.
    pub async fn fetch(&self, request: RequestIdentity) -> Result<Intercepted, Error> {
        let phase = *self.phase.read().await;
        if !phase.controlling {
            return self.pass_through(request, phase.state).await;
        }

        let superseded = {
            let mut phase = self.phase.write().await;
            self.superseded(&mut phase).await?
        };
        if superseded {
            return self.pass_through(request, WorkerState::Redundant).await;
        }

        self.interceptor.intercept(request).await
    }

    /// Mark the worker `Redundant` if it was in control and its generation is gone.
    ///
    /// Only a generation this worker activated is checked, so a fresh worker
    /// whose generation does not exist yet is never retired.
    async fn superseded(&self, phase: &mut Phase) -> Result<bool, Error> {
        if phase.state == WorkerState::Redundant {
            return Ok(true);
        }
        if !phase.controlling || self.store.has(self.generation()).await? {
            return Ok(false);
        }

        tracing::info!(generation = %self.generation(), "generation removed by a newer deployment, worker is redundant");
        *phase = Phase { state: WorkerState::Redundant, controlling: false };
        Ok(true)
    }

    async fn pass_through(&self, request: RequestIdentity, state: WorkerState) -> Result<Intercepted, Error> {
        tracing::debug!(request = %request, state = %state, "worker not in control, passing through");
        let response = self.network.fetch(&request).await?;
        Ok(Intercepted::bypassed(response))
    }
}
