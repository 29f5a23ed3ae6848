//! Install and activate transitions for cache generations.
//!
//! Install fills the generation for the current deployment; activate removes
//! every other generation. Both are driven by the worker dispatcher but can
//! be called directly.

use std::collections::HashMap;
use std::sync::Arc;

use offcache_core::{CacheStore, Error, GenerationId, RequestIdentity, StoredResponse};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::fetch::Network;

/// Default number of pre-cache fetches in flight during install.
pub const DEFAULT_PRECACHE_CONCURRENCY: usize = 4;

/// Result of a completed install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    /// Generation that was populated.
    pub generation: String,
    /// Number of entries written.
    pub cached: usize,
    /// Install always asks the runtime to activate without waiting for old sessions.
    pub skip_waiting: bool,
}

/// A stale generation that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub generation: String,
    pub reason: String,
}

/// Result of a completed activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivateOutcome {
    /// Generation that is now current.
    pub generation: String,
    /// Stale generations removed.
    pub deleted: Vec<String>,
    /// Stale generations left behind.
    pub failed: Vec<DeleteFailure>,
    /// Activation takes over open sessions immediately.
    pub clients_claimed: bool,
}

/// Establishes and retires cache generations across deployments.
#[derive(Clone)]
pub struct LifecycleController {
    store: CacheStore,
    network: Arc<dyn Network>,
    generation: GenerationId,
    assets: Vec<RequestIdentity>,
    concurrency: usize,
}

impl LifecycleController {
    pub fn new(
        store: CacheStore, network: Arc<dyn Network>, generation: GenerationId, assets: Vec<RequestIdentity>,
    ) -> Self {
        Self { store, network, generation, assets, concurrency: DEFAULT_PRECACHE_CONCURRENCY }
    }

    /// Limit the number of concurrent pre-cache fetches (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn generation(&self) -> &GenerationId {
        &self.generation
    }

    pub fn assets(&self) -> &[RequestIdentity] {
        &self.assets
    }

    /// Fetch every pre-cache asset and commit them to the current generation.
    ///
    /// All assets must come back with status 200. The first failure cancels
    /// the remaining fetches and nothing is written; a generation that did
    /// not exist before is not created.
    pub async fn install(&self) -> Result<InstallOutcome, Error> {
        tracing::info!(generation = %self.generation, assets = self.assets.len(), "install started");

        let entries = self.fetch_assets().await?;
        let cached = self.store.generation(&self.generation).put_all(entries).await?;

        tracing::info!(generation = %self.generation, cached, "install complete");

        Ok(InstallOutcome { generation: self.generation.to_string(), cached, skip_waiting: true })
    }

    async fn fetch_assets(&self) -> Result<Vec<(RequestIdentity, StoredResponse)>, Error> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();
        let mut names = HashMap::new();

        for (index, asset) in self.assets.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let network = self.network.clone();
            let name = asset.url().to_string();

            let task = join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = network.fetch(&asset).await;
                (index, asset, result)
            });
            names.insert(task.id(), name);
        }

        let mut fetched = Vec::with_capacity(self.assets.len());

        while let Some(joined) = join_set.join_next().await {
            let (index, asset, result) = match joined {
                Ok(task) => task,
                Err(e) => {
                    join_set.shutdown().await;
                    let asset = names.remove(&e.id()).unwrap_or_default();
                    return Err(Error::InstallFailed { asset, reason: e.to_string() });
                }
            };

            let failure = match result {
                Ok(response) if response.is_cacheable() => {
                    fetched.push((index, asset, response));
                    continue;
                }
                Ok(response) => format!("status {}", response.status),
                Err(e) => e.to_string(),
            };

            join_set.shutdown().await;
            tracing::warn!(generation = %self.generation, asset = %asset, reason = %failure, "install failed");
            return Err(Error::InstallFailed { asset: asset.url().to_string(), reason: failure });
        }

        fetched.sort_by_key(|(index, _, _)| *index);
        Ok(fetched.into_iter().map(|(_, asset, response)| (asset, response)).collect())
    }

    /// Delete every generation except the current one and claim clients.
    ///
    /// Deletes run independently; one failing is logged and reported in
    /// [`ActivateOutcome::failed`] without stopping the others.
    pub async fn activate(&self) -> Result<ActivateOutcome, Error> {
        tracing::info!(generation = %self.generation, "activate started");

        let stale: Vec<GenerationId> = self
            .store
            .keys()
            .await?
            .into_iter()
            .map(GenerationId::from)
            .filter(|name| name != &self.generation)
            .collect();

        let mut join_set = JoinSet::new();
        let mut names = HashMap::new();
        for name in stale {
            let store = self.store.clone();
            let task = join_set.spawn({
                let name = name.clone();
                async move {
                    let result = store.delete(&name).await;
                    (name, result)
                }
            });
            names.insert(task.id(), name);
        }

        let mut deleted = Vec::new();
        let mut failed = Vec::new();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(_))) => deleted.push(name.to_string()),
                Ok((name, Err(e))) => {
                    tracing::warn!(generation = %name, error = %e, "failed to delete stale generation");
                    failed.push(DeleteFailure { generation: name.to_string(), reason: e.to_string() });
                }
                Err(e) => {
                    let generation = names.remove(&e.id()).map(|name| name.to_string()).unwrap_or_default();
                    tracing::warn!(generation = %generation, error = %e, "stale generation delete task aborted");
                    failed.push(DeleteFailure { generation, reason: e.to_string() });
                }
            }
        }
        deleted.sort();

        self.store.open_generation(&self.generation).await?;

        tracing::info!(
            generation = %self.generation,
            deleted = deleted.len(),
            failed = failed.len(),
            "activate complete"
        );

        Ok(ActivateOutcome { generation: self.generation.to_string(), deleted, failed, clients_claimed: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::{ScriptedNetwork, identity, ok};

    fn controller(
        store: &CacheStore, network: &Arc<ScriptedNetwork>, generation: &str, paths: &[&str],
    ) -> LifecycleController {
        let assets = paths.iter().map(|p| identity(p)).collect();
        LifecycleController::new(store.clone(), network.clone(), generation.into(), assets)
    }

    #[tokio::test]
    async fn test_install_populates_generation() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        network.respond("/a", ok("A"));
        network.respond("/b", ok("B"));

        let outcome = controller(&store, &network, "g1", &["/a", "/b"]).install().await.unwrap();

        assert_eq!(outcome, InstallOutcome { generation: "g1".into(), cached: 2, skip_waiting: true });
        let g1 = store.generation(&"g1".into());
        assert_eq!(g1.match_request(&identity("/a")).await.unwrap().unwrap().body_text(), "A");
        assert_eq!(g1.match_request(&identity("/b")).await.unwrap().unwrap().body_text(), "B");
    }

    #[tokio::test]
    async fn test_install_is_atomic_on_transport_failure() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        network.respond("/a", ok("A"));
        network.fail("/b");

        let result = controller(&store, &network, "g1", &["/a", "/b"]).install().await;

        assert!(matches!(result, Err(Error::InstallFailed { ref asset, .. }) if asset.ends_with("/b")));
        assert!(!store.has(&"g1".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_install_names_asset_of_panicked_fetch() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        network.panic("/boom");

        let result = controller(&store, &network, "g1", &["/boom"]).install().await;

        match result {
            Err(Error::InstallFailed { asset, .. }) => assert_eq!(asset, "https://example.com/boom"),
            other => panic!("expected install failure, got {other:?}"),
        }
        assert!(!store.has(&"g1".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_install_rejects_non_200() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        network.respond("/a", ok("A"));
        network.respond_status("/missing", 404, "Not Found");

        let result = controller(&store, &network, "g1", &["/a", "/missing"]).install().await;

        match result {
            Err(Error::InstallFailed { reason, .. }) => assert_eq!(reason, "status 404"),
            other => panic!("expected install failure, got {other:?}"),
        }
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_failure_keeps_existing_entries() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        network.respond("/a", ok("A1"));
        let install = controller(&store, &network, "g1", &["/a"]);
        install.install().await.unwrap();

        network.respond("/a", ok("A2"));
        network.fail("/b");
        let retry = controller(&store, &network, "g1", &["/a", "/b"]);
        assert!(retry.install().await.is_err());

        let g1 = store.generation(&"g1".into());
        assert_eq!(g1.match_request(&identity("/a")).await.unwrap().unwrap().body_text(), "A1");
        assert_eq!(g1.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_install_twice_is_idempotent() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        network.respond("/a", ok("A"));
        network.respond("/b", ok("B"));
        let lifecycle = controller(&store, &network, "g1", &["/a", "/b"]);

        lifecycle.install().await.unwrap();
        let first = store.summaries().await.unwrap();
        lifecycle.install().await.unwrap();
        let second = store.summaries().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second[0].entries, 2);
    }

    #[tokio::test]
    async fn test_install_empty_asset_list() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());

        let outcome = controller(&store, &network, "g1", &[]).install().await.unwrap();

        assert_eq!(outcome.cached, 0);
        assert!(store.has(&"g1".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_install_respects_concurrency_of_one() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        for path in ["/a", "/b", "/c"] {
            network.respond(path, ok(path));
        }

        let outcome = controller(&store, &network, "g1", &["/a", "/b", "/c"])
            .with_concurrency(0)
            .install()
            .await
            .unwrap();

        assert_eq!(outcome.cached, 3);
        assert_eq!(network.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_activate_deletes_stale_generations() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        store.open_generation(&"old-1".into()).await.unwrap();
        store.open_generation(&"old-2".into()).await.unwrap();

        let outcome = controller(&store, &network, "g3", &[]).activate().await.unwrap();

        assert_eq!(outcome.deleted, vec!["old-1".to_string(), "old-2".to_string()]);
        assert!(outcome.failed.is_empty());
        assert!(outcome.clients_claimed);
        assert_eq!(store.keys().await.unwrap(), vec!["g3".to_string()]);
    }

    #[tokio::test]
    async fn test_activate_continues_past_failed_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite");
        let store = CacheStore::open(&path).await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        for name in ["old-1", "pinned", "old-2"] {
            store.open_generation(&name.into()).await.unwrap();
        }

        let side = tokio_rusqlite::Connection::open(&path).await.unwrap();
        side.call(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER keep_pinned BEFORE DELETE ON generations
                 WHEN OLD.name = 'pinned'
                 BEGIN SELECT RAISE(ABORT, 'generation is pinned'); END;",
            )
        })
        .await
        .unwrap();

        let outcome = controller(&store, &network, "g3", &[]).activate().await.unwrap();

        assert_eq!(outcome.deleted, vec!["old-1".to_string(), "old-2".to_string()]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].generation, "pinned");
        assert!(outcome.failed[0].reason.contains("pinned"));
        assert!(outcome.clients_claimed);

        let mut remaining = store.keys().await.unwrap();
        remaining.sort();
        assert_eq!(remaining, vec!["g3".to_string(), "pinned".to_string()]);
    }

    #[tokio::test]
    async fn test_activate_keeps_current_entries() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        network.respond("/a", ok("A"));
        let lifecycle = controller(&store, &network, "g1", &["/a"]);

        lifecycle.install().await.unwrap();
        let outcome = lifecycle.activate().await.unwrap();

        assert!(outcome.deleted.is_empty());
        assert_eq!(store.generation(&"g1".into()).len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_two_deployments() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        for path in ["/a", "/b", "/c"] {
            network.respond(path, ok(path));
        }

        controller(&store, &network, "g1", &["/a", "/b"]).install().await.unwrap();
        assert_eq!(store.generation(&"g1".into()).len().await.unwrap(), 2);

        let next = controller(&store, &network, "g2", &["/a", "/b", "/c"]);
        next.install().await.unwrap();
        assert_eq!(store.generation(&"g2".into()).len().await.unwrap(), 3);
        assert_eq!(store.keys().await.unwrap().len(), 2);

        let outcome = next.activate().await.unwrap();
        assert_eq!(outcome.deleted, vec!["g1".to_string()]);
        assert_eq!(store.keys().await.unwrap(), vec!["g2".to_string()]);
    }
}
