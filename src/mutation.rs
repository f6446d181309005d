//! Optimistic mutation coordination.
//!
//! Every user-initiated write on a collection resource (café items,
//! announcements, events) follows the same three-step contract:
//!
//! 1. apply the expected result to the local [`Collection`] synchronously,
//!    so the UI reflects the change immediately;
//! 2. issue the network call;
//! 3. on success replace the optimistic representation with the server's
//!    canonical object; on failure restore the pre-mutation snapshot.
//!
//! No optimistic item survives past its settling network call. Concurrent
//! mutations to *different* items are independent; two racing mutations to
//! the *same* item are allowed and resolve last-write-wins (the rollback
//! snapshot is taken per call).

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::gateway::Gateway;
use crate::model::Keyed;

/// Prefix marking ids the client invented for optimistic inserts.
const TEMP_KEY_PREFIX: &str = "tmp-";

/// Generate a temporary key for an optimistic insert.
pub fn temp_key() -> String {
    format!("{TEMP_KEY_PREFIX}{}", Uuid::new_v4())
}

/// Whether `key` is a client-invented temporary key.
pub fn is_temp_key(key: &str) -> bool {
    key.starts_with(TEMP_KEY_PREFIX)
}

// ── Collection ──────────────────────────────────────────────────────

/// Reactive in-memory collection, the single point of truth for one
/// resource's items.
///
/// Consumers read [`snapshot`](Collection::snapshot) or watch
/// [`subscribe`](Collection::subscribe); all writes go through the owning
/// [`MutationCoordinator`] or [`replace_all`](Collection::replace_all)
/// (refetch path).
#[derive(Debug)]
pub struct Collection<T: Keyed> {
    tx: watch::Sender<Vec<T>>,
}

impl<T: Keyed> Default for Collection<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: Keyed> Collection<T> {
    /// Create a collection with initial items (typically from cache).
    pub fn new(items: Vec<T>) -> Self {
        let (tx, _rx) = watch::channel(items);
        Self { tx }
    }

    /// Current items.
    pub fn snapshot(&self) -> Vec<T> {
        self.tx.borrow().clone()
    }

    /// Watch for changes.
    pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
        self.tx.subscribe()
    }

    /// Replace the whole collection (server refetch wins over local state).
    pub fn replace_all(&self, items: Vec<T>) {
        self.tx.send_replace(items);
    }

    fn push(&self, item: T) {
        self.tx.send_modify(|items| items.push(item));
    }

    fn replace_key(&self, key: &str, item: T) {
        self.tx.send_modify(|items| {
            for slot in items.iter_mut() {
                if slot.key() == key {
                    *slot = item;
                    return;
                }
            }
            // The slot vanished (e.g. a racing delete); the canonical server
            // object still belongs in the collection.
            items.push(item);
        });
    }

    fn remove_key(&self, key: &str) {
        self.tx.send_modify(|items| items.retain(|item| item.key() != key));
    }
}

// ── Coordinator ─────────────────────────────────────────────────────

/// Optimistic write coordinator for one collection resource.
pub struct MutationCoordinator<T: Keyed> {
    gateway: Arc<dyn Gateway>,
    collection: Arc<Collection<T>>,
    path: String,
    request_timeout: Duration,
}

impl<T> MutationCoordinator<T>
where
    T: Keyed + Serialize + DeserializeOwned,
{
    /// Create a coordinator writing to `path` (e.g. `/cafe-menu`).
    pub fn new(
        gateway: Arc<dyn Gateway>,
        collection: Arc<Collection<T>>,
        path: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            collection,
            path: path.into(),
            request_timeout,
        }
    }

    /// The collection this coordinator owns.
    pub fn collection(&self) -> &Arc<Collection<T>> {
        &self.collection
    }

    /// Create `item`: optimistic insert under a temporary key, then
    /// `POST <path>`; the server's canonical object replaces the placeholder.
    ///
    /// # Errors
    ///
    /// On any failure the optimistic insert is dropped and the error is
    /// returned with the server's message when one was provided.
    pub async fn create(&self, mut item: T) -> Result<T> {
        let placeholder = temp_key();
        item.set_key(placeholder.clone());
        self.collection.push(item.clone());

        let body = serde_json::to_value(&item)?;
        let outcome = self.settle(self.gateway.post(&self.path, Some(body))).await;

        match outcome {
            Ok(canonical) => {
                debug!(path = %self.path, key = %canonical.key(), "create confirmed");
                self.collection.replace_key(&placeholder, canonical.clone());
                Ok(canonical)
            }
            Err(err) => {
                warn!(path = %self.path, %err, "create failed, dropping optimistic insert");
                self.collection.remove_key(&placeholder);
                Err(err)
            }
        }
    }

    /// Update `item` in place, then `PUT <path>/<key>`; rolls the collection
    /// back to its pre-mutation snapshot on failure.
    ///
    /// # Errors
    ///
    /// Returns the rejection or transport error after the rollback.
    pub async fn update(&self, item: T) -> Result<T> {
        let before = self.collection.snapshot();
        let key = item.key().to_string();
        self.collection.replace_key(&key, item.clone());

        let body = serde_json::to_value(&item)?;
        let url = format!("{}/{}", self.path, key);
        let outcome = self.settle(self.gateway.put(&url, body)).await;

        match outcome {
            Ok(canonical) => {
                debug!(path = %url, "update confirmed");
                self.collection.replace_key(&key, canonical.clone());
                Ok(canonical)
            }
            Err(err) => {
                warn!(path = %url, %err, "update failed, rolling back");
                self.collection.replace_all(before);
                Err(err)
            }
        }
    }

    /// Delete the item under `key`, then `DELETE <path>/<key>`; restores the
    /// pre-mutation snapshot on failure.
    ///
    /// # Errors
    ///
    /// Returns the rejection or transport error after the rollback.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let before = self.collection.snapshot();
        self.collection.remove_key(key);

        let url = format!("{}/{}", self.path, key);
        let result = tokio::time::timeout(self.request_timeout, self.gateway.delete(&url))
            .await
            .map_err(|_| SyncError::Timeout)
            .and_then(|r| r);

        match result {
            Ok(resp) if resp.is_success() => {
                debug!(path = %url, "delete confirmed");
                Ok(())
            }
            Ok(resp) => {
                let err = resp.rejection();
                warn!(path = %url, %err, "delete rejected, rolling back");
                self.collection.replace_all(before);
                Err(err)
            }
            Err(err) => {
                warn!(path = %url, %err, "delete failed, rolling back");
                self.collection.replace_all(before);
                Err(err)
            }
        }
    }

    /// Await a write call under the request timeout and parse the canonical
    /// object out of a success response.
    async fn settle(
        &self,
        call: impl std::future::Future<Output = Result<crate::gateway::GatewayResponse>>,
    ) -> Result<T> {
        let resp = tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| SyncError::Timeout)??;
        if !resp.is_success() {
            return Err(resp.rejection());
        }
        resp.json()
    }
}

impl<T: Keyed> std::fmt::Debug for MutationCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("path", &self.path)
            .finish()
    }
}
