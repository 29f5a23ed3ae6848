//! Stale-while-revalidate resolution of intercepted requests.
//!
//! Every request is answered from the current generation when an entry
//! exists, while a background fetch refreshes that entry for next time. On a
//! miss the caller waits for the network instead. The cache therefore lags
//! the network by exactly one request cycle.

use std::sync::Arc;

use offcache_core::{CacheStore, Error, Generation, GenerationId, RequestIdentity, StoredResponse};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::fetch::Network;

/// Where the response handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Network,
}

/// What the background revalidation did with the network response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RevalidationOutcome {
    /// A 200 response replaced the stored entry.
    Stored,
    /// The network answered with a status that is never stored.
    Skipped { status: u16 },
    /// No response was received, or it could not be written.
    Failed(String),
    /// The request was not eligible for caching and went straight to the network.
    Bypassed,
    /// The background task panicked or was cancelled.
    Aborted,
}

/// Handle to the background fetch-and-store of one intercepted request.
///
/// Dropping it detaches the task; it keeps running.
#[derive(Debug)]
pub struct Revalidation {
    inner: RevalidationInner,
}

#[derive(Debug)]
enum RevalidationInner {
    Pending(JoinHandle<RevalidationOutcome>),
    Settled(RevalidationOutcome),
}

impl Revalidation {
    pub(crate) fn settled_with(outcome: RevalidationOutcome) -> Self {
        Self { inner: RevalidationInner::Settled(outcome) }
    }

    fn pending(handle: JoinHandle<RevalidationOutcome>) -> Self {
        Self { inner: RevalidationInner::Pending(handle) }
    }

    /// Wait for the background fetch and cache write to finish.
    pub async fn settled(self) -> RevalidationOutcome {
        match self.inner {
            RevalidationInner::Settled(outcome) => outcome,
            RevalidationInner::Pending(handle) => handle.await.unwrap_or(RevalidationOutcome::Aborted),
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.inner {
            RevalidationInner::Settled(_) => true,
            RevalidationInner::Pending(handle) => handle.is_finished(),
        }
    }
}

/// Response for an intercepted request plus its background revalidation.
#[derive(Debug)]
pub struct Intercepted {
    pub response: StoredResponse,
    pub source: ResponseSource,
    pub revalidation: Revalidation,
}

impl Intercepted {
    /// Response that went straight to the network without touching the cache.
    pub(crate) fn bypassed(response: StoredResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
            revalidation: Revalidation::settled_with(RevalidationOutcome::Bypassed),
        }
    }
}

/// Resolves intercepted requests against the current generation.
#[derive(Clone)]
pub struct FetchInterceptor {
    store: CacheStore,
    network: Arc<dyn Network>,
    generation: GenerationId,
}

impl FetchInterceptor {
    pub fn new(store: CacheStore, network: Arc<dyn Network>, generation: GenerationId) -> Self {
        Self { store, network, generation }
    }

    pub fn generation(&self) -> &GenerationId {
        &self.generation
    }

    /// Resolve one request with stale-while-revalidate.
    ///
    /// A stored entry is returned without waiting on the network. On a miss
    /// the network result is returned whatever its status, and a transport
    /// failure reaches the caller as [`Error::NetworkFailed`]. In both cases a
    /// 200 response overwrites the stored entry.
    ///
    /// Only `GET` requests are cached; other methods are passed through.
    /// The generation is never created here: it exists once activated, and a
    /// write into a generation that has since been deleted fails instead of
    /// bringing it back.
    pub async fn intercept(&self, request: RequestIdentity) -> Result<Intercepted, Error> {
        if request.method() != "GET" {
            tracing::debug!(request = %request, "not cacheable, passing through");
            let response = self.network.fetch(&request).await?;
            return Ok(Intercepted::bypassed(response));
        }

        let generation = self.store.generation(&self.generation);
        let cached = generation.match_request(&request).await?;

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(revalidate(
            self.network.clone(),
            generation,
            request.clone(),
            cached.is_some(),
            tx,
        ));
        let revalidation = Revalidation::pending(handle);

        if let Some(response) = cached {
            tracing::debug!(request = %request, generation = %self.generation, "cache hit");
            return Ok(Intercepted { response, source: ResponseSource::Cache, revalidation });
        }

        tracing::debug!(request = %request, generation = %self.generation, "cache miss");

        match rx.await {
            Ok(Ok(response)) => Ok(Intercepted { response, source: ResponseSource::Network, revalidation }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::NetworkFailed(format!("{request}: fetch task ended without a response"))),
        }
    }
}

/// Fetch from the network, hand the result to the waiting caller, then store it if cacheable.
async fn revalidate(
    network: Arc<dyn Network>, generation: Generation, request: RequestIdentity, had_cached: bool,
    tx: oneshot::Sender<Result<StoredResponse, Error>>,
) -> RevalidationOutcome {
    let result = network.fetch(&request).await;

    let (to_store, outcome) = match &result {
        Ok(response) if response.is_cacheable() => (Some(response.clone()), RevalidationOutcome::Stored),
        Ok(response) => (None, RevalidationOutcome::Skipped { status: response.status }),
        Err(e) => {
            if had_cached {
                tracing::warn!(request = %request, error = %e, "background revalidation failed");
            }
            (None, RevalidationOutcome::Failed(e.to_string()))
        }
    };

    // Nobody is listening on a cache hit.
    let _ = tx.send(result);

    let Some(response) = to_store else {
        return outcome;
    };

    match generation.put(&request, &response).await {
        Ok(()) => outcome,
        Err(e) => {
            tracing::warn!(request = %request, generation = %generation.id(), error = %e, "revalidated response not stored");
            RevalidationOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::{ScriptedNetwork, identity, ok};
    use std::time::Duration;

    async fn setup() -> (CacheStore, Arc<ScriptedNetwork>, FetchInterceptor) {
        let store = CacheStore::open_in_memory().await.unwrap();
        let network = Arc::new(ScriptedNetwork::new());
        store.open_generation(&"g1".into()).await.unwrap();
        let interceptor = FetchInterceptor::new(store.clone(), network.clone(), "g1".into());
        (store, network, interceptor)
    }

    async fn stored_body(store: &CacheStore, path: &str) -> Option<String> {
        store
            .generation(&"g1".into())
            .match_request(&identity(path))
            .await
            .unwrap()
            .map(|r| r.body_text())
    }

    #[tokio::test]
    async fn test_miss_returns_network_and_stores() {
        let (store, network, interceptor) = setup().await;
        network.respond("/a", ok("X"));

        let result = interceptor.intercept(identity("/a")).await.unwrap();

        assert_eq!(result.source, ResponseSource::Network);
        assert_eq!(result.response.body_text(), "X");
        assert_eq!(result.revalidation.settled().await, RevalidationOutcome::Stored);
        assert_eq!(stored_body(&store, "/a").await.as_deref(), Some("X"));
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_sequence() {
        let (store, network, interceptor) = setup().await;

        network.respond("/a", ok("X"));
        let first = interceptor.intercept(identity("/a")).await.unwrap();
        assert_eq!(first.response.body_text(), "X");
        first.revalidation.settled().await;

        network.respond("/a", ok("Y"));
        let second = interceptor.intercept(identity("/a")).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.response.body_text(), "X");
        assert_eq!(second.revalidation.settled().await, RevalidationOutcome::Stored);
        assert_eq!(stored_body(&store, "/a").await.as_deref(), Some("Y"));

        let third = interceptor.intercept(identity("/a")).await.unwrap();
        assert_eq!(third.source, ResponseSource::Cache);
        assert_eq!(third.response.body_text(), "Y");
    }

    #[tokio::test]
    async fn test_hit_does_not_wait_for_network() {
        let (store, network, interceptor) = setup().await;
        store
            .open_generation(&"g1".into())
            .await
            .unwrap()
            .put(&identity("/a"), &ok("cached"))
            .await
            .unwrap();
        network.hang("/a");

        let result = tokio::time::timeout(Duration::from_secs(5), interceptor.intercept(identity("/a")))
            .await
            .expect("cache hit must not wait on the network")
            .unwrap();

        assert_eq!(result.source, ResponseSource::Cache);
        assert_eq!(result.response.body_text(), "cached");
        assert!(!result.revalidation.is_finished());
    }

    #[tokio::test]
    async fn test_non_200_passed_through_and_not_stored() {
        let (store, network, interceptor) = setup().await;
        network.respond_status("/a", 500, "boom");

        let result = interceptor.intercept(identity("/a")).await.unwrap();

        assert_eq!(result.source, ResponseSource::Network);
        assert_eq!(result.response.status, 500);
        assert_eq!(result.response.body_text(), "boom");
        assert_eq!(result.revalidation.settled().await, RevalidationOutcome::Skipped { status: 500 });
        assert_eq!(stored_body(&store, "/a").await, None);
    }

    #[tokio::test]
    async fn test_error_response_never_overwrites_entry() {
        let (store, network, interceptor) = setup().await;
        network.respond("/a", ok("good"));
        interceptor.intercept(identity("/a")).await.unwrap().revalidation.settled().await;

        network.respond_status("/a", 404, "Not Found");
        let hit = interceptor.intercept(identity("/a")).await.unwrap();
        assert_eq!(hit.response.body_text(), "good");
        assert_eq!(hit.revalidation.settled().await, RevalidationOutcome::Skipped { status: 404 });

        assert_eq!(stored_body(&store, "/a").await.as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn test_transport_failure_on_hit_returns_cached() {
        let (store, network, interceptor) = setup().await;
        network.respond("/a", ok("good"));
        interceptor.intercept(identity("/a")).await.unwrap().revalidation.settled().await;

        network.fail("/a");
        let hit = interceptor.intercept(identity("/a")).await.unwrap();

        assert_eq!(hit.response.body_text(), "good");
        assert!(matches!(hit.revalidation.settled().await, RevalidationOutcome::Failed(_)));
        assert_eq!(stored_body(&store, "/a").await.as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn test_transport_failure_on_miss_is_an_error() {
        let (store, network, interceptor) = setup().await;
        network.fail("/d");

        let result = tokio::time::timeout(Duration::from_secs(5), interceptor.intercept(identity("/d")))
            .await
            .expect("failed fetch must resolve");

        assert!(matches!(result, Err(Error::NetworkFailed(_))));
        assert_eq!(stored_body(&store, "/d").await, None);
    }

    #[tokio::test]
    async fn test_non_get_bypasses_cache() {
        let (store, network, interceptor) = setup().await;
        network.respond("/submit", ok("accepted"));
        let post = RequestIdentity::new("POST", identity("/submit").url().clone());

        let result = interceptor.intercept(post.clone()).await.unwrap();

        assert_eq!(result.response.body_text(), "accepted");
        assert_eq!(result.revalidation.settled().await, RevalidationOutcome::Bypassed);
        let stored = store.generation(&"g1".into()).match_request(&post).await.unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_requests_last_write_wins() {
        let (store, network, interceptor) = setup().await;
        network.respond("/a", ok("X"));

        let (one, two) = tokio::join!(interceptor.intercept(identity("/a")), interceptor.intercept(identity("/a")));
        one.unwrap().revalidation.settled().await;
        two.unwrap().revalidation.settled().await;

        assert_eq!(stored_body(&store, "/a").await.as_deref(), Some("X"));
        assert_eq!(store.generation(&"g1".into()).len().await.unwrap(), 1);
        assert_eq!(network.calls("/a"), 2);
    }

    #[tokio::test]
    async fn test_deleted_generation_is_not_recreated() {
        let (store, network, interceptor) = setup().await;
        network.respond("/a", ok("X"));
        store.delete(&"g1".into()).await.unwrap();

        let result = interceptor.intercept(identity("/a")).await.unwrap();

        assert_eq!(result.response.body_text(), "X");
        assert!(matches!(result.revalidation.settled().await, RevalidationOutcome::Failed(_)));
        assert!(store.keys().await.unwrap().is_empty());
    }
}
