//! Key Cache.
//!
//! Holds the last good key set per JWKS endpoint and runs one refresh task
//! per endpoint. Readers take `Arc<KeySet>` snapshots and never wait on a
//! fetch.
//!
//! # Lifecycle
//!
//! - `ensure` registers a reference, spawning the refresh task on the first
//!   one and reviving an entry that is waiting to be evicted
//! - `release` drops a reference; at zero references the entry is evicted
//!   after the grace period unless it is ensured again first
//!
//! # Refresh loop
//!
//! Fetch immediately, then:
//! - success: publish, reset failures, next fetch after the refresh interval
//!   (±10% jitter)
//! - failure within `numRetries`: Stale (or Pending if never fetched), retry
//!   after exponential backoff
//! - failure beyond `numRetries`: Failed, next fetch after the jittered
//!   refresh interval
//!
//! A settings change from a later `ensure` cuts the current wait short.
//! Keys are never dropped because a fetch failed.

use crate::keys::fetcher::JwksFetcher;
use crate::keys::key_set::KeySet;
use crate::keys::RemoteJwks;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::types::EndpointId;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Default delay between the last release and eviction.
pub const DEFAULT_EVICTION_GRACE: Duration = Duration::from_secs(30);

/// Freshness of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheState {
    /// No successful fetch yet.
    Pending,
    /// Last fetch succeeded.
    Fresh,
    /// Last fetch failed, retrying with backoff; previous keys still served.
    Stale,
    /// Retries exhausted; previous keys (if any) still served.
    Failed,
}

impl CacheState {
    /// Lowercase label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CacheState::Pending => "pending",
            CacheState::Fresh => "fresh",
            CacheState::Stale => "stale",
            CacheState::Failed => "failed",
        }
    }
}

/// Point-in-time view of one endpoint, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub endpoint: EndpointId,
    pub uri: String,
    pub state: CacheState,
    pub key_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_refresh: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub references: usize,
}

/// Published by the refresh task; everything a reader may look at.
#[derive(Debug, Clone)]
struct EntryView {
    keys: Option<Arc<KeySet>>,
    state: CacheState,
    last_success: Option<DateTime<Utc>>,
    next_refresh: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl EntryView {
    fn pending() -> Self {
        Self {
            keys: None,
            state: CacheState::Pending,
            last_success: None,
            next_refresh: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

struct Entry {
    view: watch::Receiver<EntryView>,
    settings: watch::Sender<RemoteJwks>,
    refs: usize,
    cancel: CancellationToken,
    /// Set while the entry is unreferenced and waiting out the grace period.
    eviction: Option<CancellationToken>,
}

struct Inner {
    fetcher: Arc<dyn JwksFetcher>,
    grace: Duration,
    entries: RwLock<HashMap<EndpointId, Entry>>,
    shutdown: CancellationToken,
}

impl Inner {
    // The map is only mutated under short critical sections that cannot
    // leave it inconsistent, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<EndpointId, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EndpointId, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-endpoint key snapshots plus their refresh tasks.
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct KeyCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("entries", &self.len())
            .field("grace", &self.inner.grace)
            .finish_non_exhaustive()
    }
}

impl KeyCache {
    /// Create a cache with the default eviction grace period.
    pub fn new(fetcher: Arc<dyn JwksFetcher>) -> Self {
        Self::with_grace(fetcher, DEFAULT_EVICTION_GRACE)
    }

    /// Create a cache with a custom eviction grace period.
    pub fn with_grace(fetcher: Arc<dyn JwksFetcher>, grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                grace,
                entries: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Last successfully fetched key set, or `None` if the endpoint is
    /// unknown or has never been fetched.
    #[must_use]
    pub fn snapshot(&self, id: &EndpointId) -> Option<Arc<KeySet>> {
        let entries = self.inner.read();
        let entry = entries.get(id)?;
        let keys = entry.view.borrow().keys.clone();
        keys
    }

    /// Register a reference to an endpoint.
    ///
    /// Spawns the refresh task on the first reference. If the entry already
    /// exists a pending eviction is cancelled, and when `remote` differs from
    /// the current settings they are replaced and the entry is fetched again
    /// right away.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn ensure(&self, id: &EndpointId, remote: &RemoteJwks) {
        let mut entries = self.inner.write();

        if let Some(entry) = entries.get_mut(id) {
            entry.refs += 1;
            if let Some(eviction) = entry.eviction.take() {
                eviction.cancel();
                tracing::debug!(target: "authn.keys.cache", endpoint = %id, "Eviction cancelled");
            }
            entry.settings.send_if_modified(|current| {
                if current == remote {
                    false
                } else {
                    *current = remote.clone();
                    true
                }
            });
            return;
        }

        let (view_tx, view_rx) = watch::channel(EntryView::pending());
        let (settings_tx, settings_rx) = watch::channel(remote.clone());
        let cancel = self.inner.shutdown.child_token();

        tokio::spawn(refresh_loop(
            Arc::clone(&self.inner.fetcher),
            id.clone(),
            settings_rx,
            view_tx,
            cancel.clone(),
        ));

        entries.insert(
            id.clone(),
            Entry {
                view: view_rx,
                settings: settings_tx,
                refs: 1,
                cancel,
                eviction: None,
            },
        );
        metrics::set_key_cache_entries(entries.len());

        tracing::info!(target: "authn.keys.cache", endpoint = %id, uri = %remote.uri, "Key cache entry created");
    }

    /// Drop a reference to an endpoint.
    ///
    /// When the last reference goes, eviction is scheduled after the grace
    /// period. Releasing an unknown endpoint is a no-op.
    pub fn release(&self, id: &EndpointId) {
        let mut entries = self.inner.write();

        let Some(entry) = entries.get_mut(id) else {
            tracing::warn!(target: "authn.keys.cache", endpoint = %id, "Release of unknown endpoint ignored");
            return;
        };

        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 || entry.eviction.is_some() {
            return;
        }

        let eviction = CancellationToken::new();
        entry.eviction = Some(eviction.clone());
        drop(entries);

        tracing::debug!(
            target: "authn.keys.cache",
            endpoint = %id,
            grace_secs = self.inner.grace.as_secs(),
            "Eviction scheduled"
        );

        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = eviction.cancelled() => {}
                () = inner.shutdown.cancelled() => {}
                () = tokio::time::sleep(inner.grace) => evict(&inner, &id, &eviction),
            }
        });
    }

    /// Status of one endpoint.
    #[must_use]
    pub fn status(&self, id: &EndpointId) -> Option<EndpointStatus> {
        let entries = self.inner.read();
        entries.get(id).map(|entry| endpoint_status(id, entry))
    }

    /// Status of every endpoint, ordered by endpoint id.
    #[must_use]
    pub fn statuses(&self) -> Vec<EndpointStatus> {
        let entries = self.inner.read();
        let mut statuses: Vec<EndpointStatus> = entries
            .iter()
            .map(|(id, entry)| endpoint_status(id, entry))
            .collect();
        statuses.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        statuses
    }

    /// Number of entries, including those waiting to be evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Whether an entry exists for `id`.
    #[must_use]
    pub fn contains(&self, id: &EndpointId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Stop every refresh task and drop all entries.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut entries = self.inner.write();
        entries.clear();
        metrics::set_key_cache_entries(0);
        tracing::info!(target: "authn.keys.cache", "Key cache shut down");
    }
}

fn endpoint_status(id: &EndpointId, entry: &Entry) -> EndpointStatus {
    let view = entry.view.borrow();
    EndpointStatus {
        endpoint: id.clone(),
        uri: entry.settings.borrow().uri.clone(),
        state: view.state,
        key_count: view.keys.as_ref().map_or(0, |keys| keys.len()),
        last_success: view.last_success,
        next_refresh: view.next_refresh,
        consecutive_failures: view.consecutive_failures,
        last_error: view.last_error.clone(),
        references: entry.refs,
    }
}

fn evict(inner: &Inner, id: &EndpointId, eviction: &CancellationToken) {
    let mut entries = inner.write();

    // ensure() cancels the token under this same lock, so a revived entry
    // is never removed here.
    let still_unreferenced = entries
        .get(id)
        .is_some_and(|entry| entry.refs == 0 && !eviction.is_cancelled());
    if !still_unreferenced {
        return;
    }

    if let Some(entry) = entries.remove(id) {
        entry.cancel.cancel();
    }
    metrics::set_key_cache_entries(entries.len());
    tracing::info!(target: "authn.keys.cache", endpoint = %id, "Key cache entry evicted");
}

/// Refresh interval with ±10% jitter, so endpoints sharing an interval do
/// not fetch in lockstep.
fn jittered(interval: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    interval.mul_f64(factor)
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

/// One task per endpoint; attempts are strictly sequential.
async fn refresh_loop(
    fetcher: Arc<dyn JwksFetcher>,
    endpoint: EndpointId,
    mut settings: watch::Receiver<RemoteJwks>,
    view: watch::Sender<EntryView>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        let remote = settings.borrow_and_update().clone();
        let started = Instant::now();

        // An in-flight fetch is allowed to finish; its result is dropped
        // below if the entry was evicted meanwhile.
        let result = fetcher.fetch(&remote.uri, remote.timeout).await;
        let elapsed = started.elapsed();

        if cancel.is_cancelled() {
            tracing::debug!(target: "authn.keys.cache", endpoint = %endpoint, "Discarding fetch result for evicted entry");
            break;
        }

        let delay = match result {
            Ok(keys) => {
                metrics::record_jwks_fetch("success", elapsed);
                failures = 0;
                let delay = jittered(remote.refresh_interval);
                let key_count = keys.len();
                let now = Utc::now();
                view.send_modify(|v| {
                    v.keys = Some(Arc::new(keys));
                    v.state = CacheState::Fresh;
                    v.last_success = Some(now);
                    v.next_refresh = Some(now + to_chrono(delay));
                    v.consecutive_failures = 0;
                    v.last_error = None;
                });
                tracing::info!(
                    target: "authn.keys.cache",
                    endpoint = %endpoint,
                    key_count,
                    next_refresh_secs = delay.as_secs(),
                    "JWKS refreshed"
                );
                delay
            }
            Err(e) => {
                metrics::record_jwks_fetch(e.kind(), elapsed);
                failures = failures.saturating_add(1);
                let has_keys = view.borrow().keys.is_some();
                let (state, delay) = if failures <= remote.retry_policy.num_retries {
                    let state = if has_keys {
                        CacheState::Stale
                    } else {
                        CacheState::Pending
                    };
                    (state, remote.retry_policy.backoff(failures))
                } else {
                    (CacheState::Failed, jittered(remote.refresh_interval))
                };
                let now = Utc::now();
                view.send_modify(|v| {
                    v.state = state;
                    v.next_refresh = Some(now + to_chrono(delay));
                    v.consecutive_failures = failures;
                    v.last_error = Some(e.to_string());
                });
                tracing::warn!(
                    target: "authn.keys.cache",
                    endpoint = %endpoint,
                    error = %e,
                    consecutive_failures = failures,
                    state = state.as_str(),
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "JWKS refresh failed"
                );
                delay
            }
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
            changed = settings.changed() => {
                if changed.is_err() {
                    break;
                }
                tracing::debug!(target: "authn.keys.cache", endpoint = %endpoint, "Settings changed, refreshing now");
            }
        }
    }

    tracing::debug!(target: "authn.keys.cache", endpoint = %endpoint, "Refresh loop stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::keys::fetcher::FetchError;
    use crate::keys::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const JWKS_BODY: &str = r#"{"keys":[{"kty":"OKP","kid":"k1","crv":"Ed25519","x":"11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"}]}"#;

    /// Replays scripted results; repeats the last one when exhausted.
    struct ScriptedFetcher {
        script: Mutex<Vec<Result<(), FetchError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<(), FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JwksFetcher for ScriptedFetcher {
        async fn fetch(&self, _uri: &str, _timeout: Duration) -> Result<KeySet, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.remove(0)
                } else {
                    script.first().cloned().unwrap()
                }
            };
            next.map(|()| KeySet::from_json(JWKS_BODY.as_bytes()).unwrap())
        }
    }

    fn remote() -> RemoteJwks {
        RemoteJwks::new("https://foo.com/jwks.json")
            .with_timeout(Duration::from_millis(100))
            .with_refresh_interval(Duration::from_millis(200))
            .with_retry_policy(RetryPolicy {
                num_retries: 2,
                base_interval: Duration::from_millis(10),
                max_interval: Duration::from_millis(20),
            })
    }

    fn id() -> EndpointId {
        EndpointId::new("jwks_foo_com_443_00000000")
    }

    async fn wait_for_state(cache: &KeyCache, id: &EndpointId, state: CacheState) {
        for _ in 0..200 {
            if cache.status(id).is_some_and(|s| s.state == state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("endpoint never reached {state:?}: {:?}", cache.status(id));
    }

    #[test]
    fn test_jitter_within_ten_percent() {
        for _ in 0..100 {
            let d = jittered(Duration::from_secs(100));
            assert!(d >= Duration::from_secs(90) && d <= Duration::from_secs(110));
        }
    }

    #[tokio::test]
    async fn test_unknown_endpoint_has_no_snapshot() {
        let cache = KeyCache::new(ScriptedFetcher::new(vec![Ok(())]));
        assert!(cache.snapshot(&id()).is_none());
        assert!(cache.status(&id()).is_none());
    }

    #[tokio::test]
    async fn test_ensure_fetches_and_publishes() {
        let cache = KeyCache::new(ScriptedFetcher::new(vec![Ok(())]));
        cache.ensure(&id(), &remote());

        wait_for_state(&cache, &id(), CacheState::Fresh).await;
        let keys = cache.snapshot(&id()).unwrap();
        assert!(keys.get("k1").is_some());

        let status = cache.status(&id()).unwrap();
        assert_eq!(status.key_count, 1);
        assert_eq!(status.references, 1);
        assert!(status.last_success.is_some());
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_never_fetched_stays_pending_without_snapshot() {
        let fetcher = ScriptedFetcher::new(vec![Err(FetchError::HttpStatus(500))]);
        let cache = KeyCache::new(fetcher.clone());
        cache.ensure(&id(), &remote());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = cache.status(&id()).unwrap();
        assert!(matches!(status.state, CacheState::Pending | CacheState::Failed));
        assert!(cache.snapshot(&id()).is_none());
        assert!(status.last_error.is_some());
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_failures_keep_last_good_keys() {
        let fetcher = ScriptedFetcher::new(vec![Ok(()), Err(FetchError::Timeout)]);
        let cache = KeyCache::new(fetcher.clone());
        cache.ensure(&id(), &remote());

        wait_for_state(&cache, &id(), CacheState::Fresh).await;
        wait_for_state(&cache, &id(), CacheState::Stale).await;
        assert!(cache.snapshot(&id()).is_some());

        wait_for_state(&cache, &id(), CacheState::Failed).await;
        assert!(cache.snapshot(&id()).is_some());
        let status = cache.status(&id()).unwrap();
        assert!(status.consecutive_failures > 2);
        assert_eq!(status.key_count, 1);
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::ConnectionError("refused".into())),
            Ok(()),
        ]);
        let cache = KeyCache::new(fetcher.clone());
        cache.ensure(&id(), &remote());

        wait_for_state(&cache, &id(), CacheState::Fresh).await;
        let status = cache.status(&id()).unwrap();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_none());
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent_per_endpoint() {
        let fetcher = ScriptedFetcher::new(vec![Ok(())]);
        let cache = KeyCache::new(fetcher.clone());
        cache.ensure(&id(), &remote());
        cache.ensure(&id(), &remote());

        wait_for_state(&cache, &id(), CacheState::Fresh).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.status(&id()).unwrap().references, 2);
        // One refresh loop only: a single initial fetch.
        assert_eq!(fetcher.calls(), 1);
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_release_evicts_after_grace() {
        let cache = KeyCache::with_grace(
            ScriptedFetcher::new(vec![Ok(())]),
            Duration::from_millis(30),
        );
        cache.ensure(&id(), &remote());
        cache.release(&id());

        assert!(cache.contains(&id()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!cache.contains(&id()));
        assert!(cache.snapshot(&id()).is_none());
    }

    #[tokio::test]
    async fn test_reensure_within_grace_cancels_eviction() {
        let cache = KeyCache::with_grace(
            ScriptedFetcher::new(vec![Ok(())]),
            Duration::from_millis(50),
        );
        cache.ensure(&id(), &remote());
        wait_for_state(&cache, &id(), CacheState::Fresh).await;

        cache.release(&id());
        cache.ensure(&id(), &remote());
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(cache.contains(&id()));
        assert!(cache.snapshot(&id()).is_some());
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_settings_change_refreshes_without_waiting() {
        let fetcher = ScriptedFetcher::new(vec![Ok(())]);
        let cache = KeyCache::new(fetcher.clone());
        let slow = remote().with_refresh_interval(Duration::from_secs(3600));
        cache.ensure(&id(), &slow);
        wait_for_state(&cache, &id(), CacheState::Fresh).await;
        assert_eq!(fetcher.calls(), 1);

        // Identical settings do not wake the refresh task
        cache.ensure(&id(), &slow);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fetcher.calls(), 1);

        cache.ensure(&id(), &slow.clone().with_refresh_interval(Duration::from_secs(300)));
        let rescheduled = |cache: &KeyCache| {
            cache
                .status(&id())
                .and_then(|s| s.next_refresh)
                .is_some_and(|next| next < Utc::now() + chrono::Duration::seconds(400))
        };
        for _ in 0..200 {
            if rescheduled(&cache) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(rescheduled(&cache), "{:?}", cache.status(&id()));
        assert_eq!(fetcher.calls(), 2);
        cache.shutdown();
    }

    #[tokio::test]
    async fn test_release_unknown_is_noop() {
        let cache = KeyCache::new(ScriptedFetcher::new(vec![Ok(())]));
        cache.release(&id());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_statuses_sorted_by_endpoint() {
        let cache = KeyCache::new(ScriptedFetcher::new(vec![Ok(())]));
        let b = EndpointId::new("jwks_b");
        let a = EndpointId::new("jwks_a");
        cache.ensure(&b, &remote());
        cache.ensure(&a, &remote());

        let statuses = cache.statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].endpoint, a);
        assert_eq!(statuses[1].endpoint, b);
        cache.shutdown();
    }

    /// Records how many fetches overlap.
    struct SlowFetcher {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JwksFetcher for SlowFetcher {
        async fn fetch(&self, _uri: &str, _timeout: Duration) -> Result<KeySet, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Err(FetchError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_refresh_attempts_never_overlap() {
        let fetcher = Arc::new(SlowFetcher {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let cache = KeyCache::new(fetcher.clone());
        // Backoff and refresh interval both shorter than one fetch
        let remote = RemoteJwks::new("https://foo.com/jwks.json")
            .with_refresh_interval(Duration::from_millis(5))
            .with_retry_policy(RetryPolicy {
                num_retries: 100,
                base_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(1),
            });
        cache.ensure(&id(), &remote);
        cache.ensure(&id(), &remote);

        tokio::time::sleep(Duration::from_millis(300)).await;
        cache.shutdown();

        assert!(fetcher.calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_clears_entries() {
        let fetcher = ScriptedFetcher::new(vec![Ok(())]);
        let cache = KeyCache::new(fetcher.clone());
        cache.ensure(&id(), &remote());
        wait_for_state(&cache, &id(), CacheState::Fresh).await;

        cache.shutdown();
        assert!(cache.is_empty());

        let calls = fetcher.calls();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fetcher.calls(), calls);
    }
}
