//! Per-member dismissed-notice tracking.
//!
//! The set of announcement ids a member has dismissed lives server-side, but
//! the local set is the source of truth for the session: dismissals apply
//! locally (and to the per-email cache key) immediately, and the server call
//! is fire-and-forget — its failure is swallowed so a flaky network never
//! resurrects a dismissed banner.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::gateway::Gateway;
use crate::store::{self, dismissed_notices_key, CacheStore};
use crate::util::lock;

/// Endpoint serving and accepting dismissed announcement ids.
const DISMISSED_PATH: &str = "/notifications/dismissed";

/// A member's dismissed-announcement id set.
pub struct DismissedNotices {
    gateway: Arc<dyn Gateway>,
    cache: Arc<dyn CacheStore>,
    cache_key: String,
    request_timeout: Duration,
    ids: StdMutex<HashSet<String>>,
}

impl DismissedNotices {
    /// Create an empty set for the member identified by `email`.
    pub fn new(
        gateway: Arc<dyn Gateway>,
        cache: Arc<dyn CacheStore>,
        email: &str,
        request_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            cache,
            cache_key: dismissed_notices_key(email),
            request_timeout,
            ids: StdMutex::new(HashSet::new()),
        }
    }

    /// Load the set: from the network when reachable, from the per-email
    /// cache key otherwise. Never fails; a cold cache just yields an empty
    /// set.
    pub async fn load(&self) {
        let fetched = tokio::time::timeout(self.request_timeout, self.gateway.get(DISMISSED_PATH))
            .await
            .ok()
            .and_then(|result| result.ok())
            .filter(|resp| resp.is_success())
            .and_then(|resp| resp.json::<Vec<String>>().ok());

        let ids: Vec<String> = match fetched {
            Some(ids) => {
                store::save_typed(&*self.cache, &self.cache_key, &ids);
                ids
            }
            None => {
                debug!("dismissed-notice fetch unavailable, using cached set");
                store::load_typed(&*self.cache, &self.cache_key).unwrap_or_default()
            }
        };

        *lock(&self.ids) = ids.into_iter().collect();
    }

    /// Dismiss an announcement: local set and cache update immediately, the
    /// server call runs fire-and-forget.
    pub fn dismiss(&self, id: impl Into<String>) {
        let id = id.into();
        {
            let mut ids = lock(&self.ids);
            if !ids.insert(id.clone()) {
                return;
            }
            let snapshot: Vec<&String> = ids.iter().collect();
            store::save_typed(&*self.cache, &self.cache_key, &snapshot);
        }

        let gateway = Arc::clone(&self.gateway);
        let request_timeout = self.request_timeout;
        tokio::spawn(async move {
            let body = serde_json::json!({ "id": id });
            let result =
                tokio::time::timeout(request_timeout, gateway.post(DISMISSED_PATH, Some(body)))
                    .await;
            match result {
                Ok(Ok(resp)) if resp.is_success() => {}
                Ok(Ok(resp)) => {
                    warn!(id, status = resp.status, "server rejected dismissal; keeping local state");
                }
                Ok(Err(err)) => warn!(id, %err, "dismissal call failed; keeping local state"),
                Err(_) => warn!(id, "dismissal call timed out; keeping local state"),
            }
        });
    }

    /// Whether `id` has been dismissed.
    pub fn is_dismissed(&self, id: &str) -> bool {
        lock(&self.ids).contains(id)
    }

    /// A copy of the current set.
    pub fn ids(&self) -> HashSet<String> {
        lock(&self.ids).clone()
    }
}

impl std::fmt::Debug for DismissedNotices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DismissedNotices")
            .field("cache_key", &self.cache_key)
            .field("count", &lock(&self.ids).len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::{Result, SyncError};
    use crate::gateway::GatewayResponse;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct FixedGateway {
        get_response: Option<GatewayResponse>,
    }

    #[async_trait]
    impl Gateway for FixedGateway {
        async fn get(&self, _path: &str) -> Result<GatewayResponse> {
            self.get_response
                .clone()
                .ok_or(SyncError::Offline)
        }

        async fn post(
            &self,
            _path: &str,
            _body: Option<serde_json::Value>,
        ) -> Result<GatewayResponse> {
            Err(SyncError::Offline)
        }

        async fn put(&self, _path: &str, _body: serde_json::Value) -> Result<GatewayResponse> {
            Err(SyncError::Offline)
        }

        async fn delete(&self, _path: &str) -> Result<GatewayResponse> {
            Err(SyncError::Offline)
        }
    }

    #[tokio::test]
    async fn load_prefers_the_network() {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let notices = DismissedNotices::new(
            Arc::new(FixedGateway {
                get_response: Some(GatewayResponse::new(200, r#"["a-1", "a-2"]"#)),
            }),
            Arc::clone(&cache),
            "avery@foyer.club",
            Duration::from_millis(100),
        );

        notices.load().await;
        assert!(notices.is_dismissed("a-1"));
        assert!(notices.is_dismissed("a-2"));
        assert!(!notices.is_dismissed("a-3"));

        // The fetched set was mirrored into the per-email cache key.
        let cached: Vec<String> =
            store::load_typed(&*cache, &dismissed_notices_key("avery@foyer.club")).unwrap();
        assert_eq!(cached.len(), 2);
    }

    #[tokio::test]
    async fn load_falls_back_to_the_cache() {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        store::save_typed(
            &*cache,
            &dismissed_notices_key("avery@foyer.club"),
            &vec!["a-9".to_string()],
        );

        let notices = DismissedNotices::new(
            Arc::new(FixedGateway { get_response: None }),
            Arc::clone(&cache),
            "avery@foyer.club",
            Duration::from_millis(100),
        );

        notices.load().await;
        assert!(notices.is_dismissed("a-9"));
    }

    #[tokio::test]
    async fn dismiss_applies_locally_even_when_the_server_is_down() {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let notices = DismissedNotices::new(
            Arc::new(FixedGateway { get_response: None }),
            Arc::clone(&cache),
            "avery@foyer.club",
            Duration::from_millis(50),
        );

        notices.dismiss("a-5");
        assert!(notices.is_dismissed("a-5"));

        // The fire-and-forget call fails in the background; local and cached
        // state are unaffected.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(notices.is_dismissed("a-5"));
        let cached: Vec<String> =
            store::load_typed(&*cache, &dismissed_notices_key("avery@foyer.club")).unwrap();
        assert_eq!(cached, vec!["a-5".to_string()]);
    }
}
