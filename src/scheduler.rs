//! Background sync scheduler.
//!
//! [`SyncScheduler`] periodically refreshes the cacheable read-mostly
//! resources (events, café menu, announcements, notification counts, and the
//! directory for privileged roles) and exposes the same machinery to
//! event-triggered refreshes. It is an explicit service instance with a
//! `new`/`start`/`stop` lifecycle — all bookkeeping (last-fetch times,
//! failure counters, the interval task) lives on the instance, never in
//! module state.
//!
//! Read-path failures are never surfaced: every degraded outcome falls back
//! to the last cached value, and a resource counts as "loaded" as soon as
//! either the cache or a first response has populated it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::gateway::Gateway;
use crate::store::{CacheEntry, CacheStore};
use crate::util::lock;

/// Capacity of the resource-update broadcast channel.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

// ── Presence ────────────────────────────────────────────────────────

/// Shared connectivity/visibility flags.
///
/// The embedding front end feeds browser (or platform) events into the
/// setters; the scheduler reads the flags to gate work and watches
/// visibility to trigger a pass when the page regains the foreground.
#[derive(Clone, Debug)]
pub struct Presence {
    inner: Arc<PresenceInner>,
}

#[derive(Debug)]
struct PresenceInner {
    online: watch::Sender<bool>,
    visible: watch::Sender<bool>,
}

impl Default for Presence {
    fn default() -> Self {
        Self::new()
    }
}

impl Presence {
    /// Create a presence handle that starts online and visible.
    pub fn new() -> Self {
        let (online, _) = watch::channel(true);
        let (visible, _) = watch::channel(true);
        Self {
            inner: Arc::new(PresenceInner { online, visible }),
        }
    }

    /// Whether the client currently has connectivity.
    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Whether the page/window is currently visible.
    pub fn is_visible(&self) -> bool {
        *self.inner.visible.borrow()
    }

    /// Update the connectivity flag.
    pub fn set_online(&self, online: bool) {
        self.inner.online.send_replace(online);
    }

    /// Update the visibility flag.
    pub fn set_visible(&self, visible: bool) {
        self.inner.visible.send_replace(visible);
    }

    /// Watch visibility changes.
    pub fn subscribe_visibility(&self) -> watch::Receiver<bool> {
        self.inner.visible.subscribe()
    }
}

// ── Resource bookkeeping ────────────────────────────────────────────

/// A resource the scheduler keeps fresh.
#[derive(Debug, Clone)]
struct ResourceSpec {
    key: String,
    path: String,
}

/// Notification that a resource's cached value changed.
#[derive(Debug, Clone)]
pub struct ResourceUpdate {
    /// Cache key of the resource.
    pub key: String,
    /// The fresh value, as stored.
    pub data: serde_json::Value,
}

// ── Scheduler ───────────────────────────────────────────────────────

/// Visibility-aware periodic refresher for cacheable resources.
///
/// Cheap to clone; clones share the same instance.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    gateway: Arc<dyn Gateway>,
    cache: Arc<dyn CacheStore>,
    presence: Presence,
    config: SyncConfig,
    resources: StdMutex<Vec<ResourceSpec>>,
    last_attempt: StdMutex<HashMap<String, Instant>>,
    failures: StdMutex<HashMap<String, u32>>,
    updates: broadcast::Sender<ResourceUpdate>,
    running: AtomicBool,
    task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SyncScheduler {
    /// Create a scheduler over the given gateway, cache, and presence flags.
    pub fn new(
        gateway: Arc<dyn Gateway>,
        cache: Arc<dyn CacheStore>,
        presence: Presence,
        config: SyncConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SchedulerInner {
                gateway,
                cache,
                presence,
                config,
                resources: StdMutex::new(Vec::new()),
                last_attempt: StdMutex::new(HashMap::new()),
                failures: StdMutex::new(HashMap::new()),
                updates,
                running: AtomicBool::new(false),
                task: StdMutex::new(None),
            }),
        }
    }

    /// Register a resource for background refresh.
    pub fn track(&self, key: impl Into<String>, path: impl Into<String>) {
        lock(&self.inner.resources).push(ResourceSpec {
            key: key.into(),
            path: path.into(),
        });
    }

    /// Stop refreshing a resource (e.g. the directory after a role change).
    pub fn untrack(&self, key: &str) {
        lock(&self.inner.resources).retain(|spec| spec.key != key);
    }

    /// Subscribe to resource updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceUpdate> {
        self.inner.updates.subscribe()
    }

    /// Start the background task. Idempotent: a second call while running
    /// has no additional effect. The task runs an immediate pass, then one
    /// per [`SyncConfig::sync_interval`], plus one whenever the page regains
    /// the foreground.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("scheduler already running, ignoring repeat start");
            return;
        }
        debug!("starting background sync scheduler");
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(run_loop(inner));
        *lock(&self.inner.task) = Some(handle);
    }

    /// Cancel the background task. Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!("stopping background sync scheduler");
        if let Some(handle) = lock(&self.inner.task).take() {
            handle.abort();
        }
    }

    /// Whether the background task is active.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Drop the throttle state for `key`, so the next fetch goes to the
    /// network regardless of when the last one ran.
    pub fn invalidate(&self, key: &str) {
        lock(&self.inner.last_attempt).remove(key);
    }

    /// Current cumulative failure count for `key`.
    pub fn failure_count(&self, key: &str) -> u32 {
        lock(&self.inner.failures).get(key).copied().unwrap_or(0)
    }

    /// Run one sync pass now (skipped when hidden or offline).
    pub async fn sync_now(&self) {
        self.inner.sync_pass().await;
    }

    /// Fetch `path`, cache it under `key`, and return the freshest value
    /// available. See the module docs for the degradation ladder; the return
    /// value is `None` only when the fetch failed *and* the cache is cold.
    pub async fn fetch_and_cache(&self, key: &str, path: &str) -> Option<serde_json::Value> {
        self.inner.fetch_and_cache(key, path).await
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("running", &self.is_running())
            .field("resources", &lock(&self.inner.resources).len())
            .finish()
    }
}

/// Interval/visibility loop behind [`SyncScheduler::start`].
async fn run_loop(inner: Arc<SchedulerInner>) {
    inner.sync_pass().await;

    let mut ticker = tokio::time::interval(inner.config.sync_interval);
    // A hidden tab must not queue a burst of catch-up passes.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; the immediate pass above already
    // covered it.
    ticker.tick().await;

    let mut visibility = inner.presence.subscribe_visibility();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                inner.sync_pass().await;
            }
            changed = visibility.changed() => match changed {
                Ok(()) => {
                    if *visibility.borrow_and_update() {
                        debug!("foreground regained, running sync pass");
                        inner.sync_pass().await;
                    }
                }
                Err(_) => break,
            }
        }
    }
}

impl SchedulerInner {
    /// One pass over every tracked resource. Hidden/offline passes are
    /// skipped outright, not deferred.
    async fn sync_pass(&self) {
        if !self.presence.is_visible() {
            debug!("sync pass skipped: page hidden");
            return;
        }
        if !self.presence.is_online() {
            debug!("sync pass skipped: offline");
            return;
        }
        let resources = lock(&self.resources).clone();
        for spec in resources {
            self.fetch_and_cache(&spec.key, &spec.path).await;
        }
    }

    async fn fetch_and_cache(&self, key: &str, path: &str) -> Option<serde_json::Value> {
        let mut attempt: u32 = 0;

        loop {
            if !self.presence.is_online() {
                debug!(key, "offline, serving cache");
                return self.cached(key);
            }
            if attempt == 0 && self.within_throttle(key) {
                debug!(key, "throttled, serving cache");
                return self.cached(key);
            }
            self.record_attempt(key);

            let outcome = tokio::time::timeout(
                self.config.request_timeout,
                self.gateway.get(path),
            )
            .await;

            let response = match outcome {
                // Internal timeout: soft failure. Serve cache, leave the
                // failure counter alone.
                Err(_elapsed) => {
                    debug!(key, "fetch aborted by timeout, serving cache");
                    return self.cached(key);
                }
                Ok(Err(SyncError::Timeout)) => {
                    debug!(key, "fetch aborted by timeout, serving cache");
                    return self.cached(key);
                }
                Ok(Err(SyncError::Offline)) => {
                    debug!(key, "went offline mid-fetch, serving cache");
                    return self.cached(key);
                }
                Ok(Err(err)) => {
                    let failures = self.bump_failure(key);
                    if attempt < self.config.max_retries && failures <= self.config.max_retries {
                        attempt += 1;
                        debug!(key, %err, attempt, "transport error, retrying");
                        tokio::time::sleep(self.config.retry_backoff_base * attempt).await;
                        continue;
                    }
                    warn!(key, %err, failures, "fetch failed, serving cache");
                    return self.cached(key);
                }
                Ok(Ok(response)) => response,
            };

            if response.is_not_modified() {
                debug!(key, "not modified");
                self.reset_failures(key);
                return self.cached(key);
            }

            if response.is_success() {
                return match serde_json::from_str::<serde_json::Value>(&response.body) {
                    Ok(data) => {
                        self.cache.save(key, CacheEntry::now(data.clone()));
                        self.reset_failures(key);
                        let _ = self.updates.send(ResourceUpdate {
                            key: key.to_string(),
                            data: data.clone(),
                        });
                        debug!(key, "resource refreshed");
                        Some(data)
                    }
                    Err(err) => {
                        warn!(key, %err, "fresh payload was undecodable, serving cache");
                        self.cached(key)
                    }
                };
            }

            if response.is_server_error() {
                if attempt < self.config.max_retries {
                    attempt += 1;
                    debug!(key, status = response.status, attempt, "server error, retrying");
                    tokio::time::sleep(self.config.retry_backoff_base * attempt).await;
                    continue;
                }
                warn!(key, status = response.status, "server error after retries, serving cache");
                return self.cached(key);
            }

            // 4xx: retrying a client error cannot help.
            warn!(key, status = response.status, "fetch rejected, serving cache");
            return self.cached(key);
        }
    }

    fn cached(&self, key: &str) -> Option<serde_json::Value> {
        self.cache.load(key).map(|entry| entry.data)
    }

    fn within_throttle(&self, key: &str) -> bool {
        lock(&self.last_attempt)
            .get(key)
            .is_some_and(|at| at.elapsed() < self.config.throttle_window)
    }

    fn record_attempt(&self, key: &str) {
        lock(&self.last_attempt).insert(key.to_string(), Instant::now());
    }

    fn bump_failure(&self, key: &str) -> u32 {
        let mut failures = lock(&self.failures);
        let count = failures.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn reset_failures(&self, key: &str) {
        lock(&self.failures).remove(key);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::gateway::GatewayResponse;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct ScriptedGateway {
        responses: StdMutex<VecDeque<crate::error::Result<GatewayResponse>>>,
        calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn new(responses: Vec<crate::error::Result<GatewayResponse>>) -> Self {
            Self {
                responses: StdMutex::new(responses.into_iter().collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Gateway for ScriptedGateway {
        async fn get(&self, _path: &str) -> crate::error::Result<GatewayResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.responses)
                .pop_front()
                .unwrap_or(Ok(GatewayResponse::new(200, "[]")))
        }

        async fn post(
            &self,
            _path: &str,
            _body: Option<serde_json::Value>,
        ) -> crate::error::Result<GatewayResponse> {
            Err(SyncError::Offline)
        }

        async fn put(
            &self,
            _path: &str,
            _body: serde_json::Value,
        ) -> crate::error::Result<GatewayResponse> {
            Err(SyncError::Offline)
        }

        async fn delete(&self, _path: &str) -> crate::error::Result<GatewayResponse> {
            Err(SyncError::Offline)
        }
    }

    fn scheduler_with(
        responses: Vec<crate::error::Result<GatewayResponse>>,
    ) -> (SyncScheduler, Arc<ScriptedGateway>, Arc<MemoryStore>, Presence) {
        let gateway = Arc::new(ScriptedGateway::new(responses));
        let cache = Arc::new(MemoryStore::new());
        let presence = Presence::new();
        let config = SyncConfig::new("https://api.test")
            .with_retry_backoff_base(Duration::from_millis(1))
            .with_request_timeout(Duration::from_millis(100));
        let scheduler = SyncScheduler::new(
            Arc::clone(&gateway) as Arc<dyn Gateway>,
            Arc::clone(&cache) as Arc<dyn CacheStore>,
            presence.clone(),
            config,
        );
        (scheduler, gateway, cache, presence)
    }

    #[tokio::test]
    async fn offline_serves_cache_without_network() {
        let (scheduler, gateway, cache, presence) = scheduler_with(vec![]);
        cache.save("events", CacheEntry::now(serde_json::json!([{"id": 1}])));
        presence.set_online(false);

        let data = scheduler.fetch_and_cache("events", "/events").await.unwrap();
        assert_eq!(data, serde_json::json!([{"id": 1}]));
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn throttle_suppresses_second_fetch() {
        let (scheduler, gateway, _cache, _presence) = scheduler_with(vec![
            Ok(GatewayResponse::new(200, r#"[{"id": "e-1"}]"#)),
            Ok(GatewayResponse::new(200, r#"[{"id": "e-2"}]"#)),
        ]);

        let first = scheduler.fetch_and_cache("events", "/events").await.unwrap();
        let second = scheduler.fetch_and_cache("events", "/events").await.unwrap();

        assert_eq!(gateway.call_count(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn invalidate_lifts_the_throttle() {
        let (scheduler, gateway, _cache, _presence) = scheduler_with(vec![
            Ok(GatewayResponse::new(200, r#"[{"id": "e-1"}]"#)),
            Ok(GatewayResponse::new(200, r#"[{"id": "e-2"}]"#)),
        ]);

        scheduler.fetch_and_cache("events", "/events").await;
        scheduler.invalidate("events");
        let second = scheduler.fetch_and_cache("events", "/events").await.unwrap();

        assert_eq!(gateway.call_count(), 2);
        assert_eq!(second, serde_json::json!([{"id": "e-2"}]));
    }

    #[tokio::test]
    async fn server_errors_retry_then_succeed() {
        let (scheduler, gateway, cache, _presence) = scheduler_with(vec![
            Ok(GatewayResponse::new(500, "")),
            Ok(GatewayResponse::new(500, "")),
            Ok(GatewayResponse::new(200, r#"[{"id": "fresh"}]"#)),
        ]);

        let data = scheduler.fetch_and_cache("events", "/events").await.unwrap();
        assert_eq!(data, serde_json::json!([{"id": "fresh"}]));
        assert_eq!(gateway.call_count(), 3);
        assert_eq!(scheduler.failure_count("events"), 0);
        assert_eq!(
            cache.load("events").unwrap().data,
            serde_json::json!([{"id": "fresh"}])
        );
    }

    #[tokio::test]
    async fn server_errors_beyond_ceiling_fall_back_to_cache() {
        let (scheduler, gateway, cache, _presence) = scheduler_with(vec![
            Ok(GatewayResponse::new(500, "")),
            Ok(GatewayResponse::new(500, "")),
            Ok(GatewayResponse::new(500, "")),
        ]);
        cache.save("events", CacheEntry::now(serde_json::json!([{"id": "stale"}])));

        let data = scheduler.fetch_and_cache("events", "/events").await.unwrap();
        assert_eq!(data, serde_json::json!([{"id": "stale"}]));
        assert_eq!(gateway.call_count(), 3);
    }

    #[tokio::test]
    async fn not_modified_serves_cache_and_resets_failures() {
        let (scheduler, _gateway, cache, _presence) = scheduler_with(vec![
            Err(SyncError::TransportReceive("reset".into())),
            Ok(GatewayResponse::new(304, "")),
        ]);
        cache.save("events", CacheEntry::now(serde_json::json!([{"id": "kept"}])));

        // First attempt errors (failure count 1), retry sees the 304.
        let data = scheduler.fetch_and_cache("events", "/events").await.unwrap();
        assert_eq!(data, serde_json::json!([{"id": "kept"}]));
        assert_eq!(scheduler.failure_count("events"), 0);
    }

    #[tokio::test]
    async fn timeout_is_a_soft_failure() {
        let (scheduler, _gateway, cache, _presence) =
            scheduler_with(vec![Err(SyncError::Timeout)]);
        cache.save("events", CacheEntry::now(serde_json::json!([{"id": "kept"}])));

        let data = scheduler.fetch_and_cache("events", "/events").await.unwrap();
        assert_eq!(data, serde_json::json!([{"id": "kept"}]));
        assert_eq!(scheduler.failure_count("events"), 0);
    }

    #[tokio::test]
    async fn transport_errors_bump_the_failure_counter() {
        let (scheduler, _gateway, _cache, _presence) = scheduler_with(vec![
            Err(SyncError::TransportReceive("a".into())),
            Err(SyncError::TransportReceive("b".into())),
            Err(SyncError::TransportReceive("c".into())),
        ]);

        let data = scheduler.fetch_and_cache("events", "/events").await;
        assert!(data.is_none());
        assert_eq!(scheduler.failure_count("events"), 3);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_cancels() {
        let (scheduler, _gateway, _cache, _presence) = scheduler_with(vec![]);
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn hidden_page_skips_the_pass() {
        let (scheduler, gateway, _cache, presence) = scheduler_with(vec![]);
        scheduler.track("events", "/events");
        presence.set_visible(false);

        scheduler.sync_now().await;
        assert_eq!(gateway.call_count(), 0);
    }
}
