//! Local persistent cache.
//!
//! Every cacheable resource is persisted as a `{data, timestamp}` entry keyed
//! by resource name, so a reload can paint from cache before the first
//! network response lands. The [`CacheStore`] trait is the seam: front ends
//! back it with whatever the platform persists (browser local storage, a
//! file, ...); [`MemoryStore`] is the built-in volatile implementation used
//! by tests and headless tools.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::util::lock;

// ── Resource keys ───────────────────────────────────────────────────

/// Cache keys for the background-synced resources.
pub mod keys {
    /// Club event listings.
    pub const EVENTS: &str = "events";
    /// Café menu.
    pub const CAFE_MENU: &str = "cafe-menu";
    /// Announcements.
    pub const ANNOUNCEMENTS: &str = "announcements";
    /// Pending notification counts.
    pub const NOTIFICATIONS: &str = "notifications";
    /// Member directory (privileged roles only).
    pub const DIRECTORY: &str = "directory";
}

/// Cache key for a member's dismissed-notice id list.
pub fn dismissed_notices_key(email: &str) -> String {
    format!("foyer.dismissed.{}", email.to_ascii_lowercase())
}

// ── Entries ─────────────────────────────────────────────────────────

/// A cached resource value and the instant it was stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    /// Wrap a value with the current timestamp.
    pub fn now(data: serde_json::Value) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
        }
    }
}

// ── Store seam ──────────────────────────────────────────────────────

/// Key-value persistence for cache entries.
///
/// Implementations must be cheap and synchronous — the engine calls them on
/// hot paths (optimistic mutations, dismissal clicks) and never awaits them.
pub trait CacheStore: Send + Sync + 'static {
    /// Load the entry stored under `key`, if any.
    fn load(&self, key: &str) -> Option<CacheEntry>;

    /// Store `entry` under `key`, replacing any previous value.
    fn save(&self, key: &str, entry: CacheEntry);

    /// Remove the entry stored under `key`.
    fn remove(&self, key: &str);
}

/// Load and deserialize a typed value from a cache entry.
///
/// Undecodable entries are treated as absent (and logged): a schema change
/// across app versions must degrade to a cold cache, not an error.
pub fn load_typed<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Option<T> {
    let entry = store.load(key)?;
    match serde_json::from_value(entry.data) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, %err, "discarding undecodable cache entry");
            None
        }
    }
}

/// Serialize and store a typed value under `key` with the current timestamp.
pub fn save_typed<T: Serialize>(store: &dyn CacheStore, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(data) => store.save(key, CacheEntry::now(data)),
        Err(err) => warn!(key, %err, "failed to serialize value for cache"),
    }
}

// ── Built-in implementation ─────────────────────────────────────────

/// Volatile in-memory [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, key: &str) -> Option<CacheEntry> {
        lock(&self.entries).get(key).cloned()
    }

    fn save(&self, key: &str, entry: CacheEntry) {
        lock(&self.entries).insert(key.to_string(), entry);
    }

    fn remove(&self, key: &str) {
        lock(&self.entries).remove(key);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn save_load_remove_round_trip() {
        let store = MemoryStore::new();
        store.save(keys::EVENTS, CacheEntry::now(serde_json::json!([{"id": "e-1"}])));

        let entry = store.load(keys::EVENTS).unwrap();
        assert_eq!(entry.data[0]["id"], "e-1");

        store.remove(keys::EVENTS);
        assert!(store.load(keys::EVENTS).is_none());
    }

    #[test]
    fn typed_helpers_round_trip() {
        let store = MemoryStore::new();
        save_typed(&store, "k", &vec!["a".to_string(), "b".to_string()]);
        let loaded: Vec<String> = load_typed(&store, "k").unwrap();
        assert_eq!(loaded, vec!["a", "b"]);
    }

    #[test]
    fn undecodable_entry_reads_as_absent() {
        let store = MemoryStore::new();
        store.save("k", CacheEntry::now(serde_json::json!({"not": "a vec"})));
        let loaded: Option<Vec<String>> = load_typed(&store, "k");
        assert!(loaded.is_none());
    }

    #[test]
    fn dismissed_key_is_lowercased_per_email() {
        assert_eq!(
            dismissed_notices_key("Avery@Foyer.Club"),
            "foyer.dismissed.avery@foyer.club"
        );
    }
}
