//! Engine configuration.
//!
//! Every timing knob the sync protocol depends on lives here as an explicit
//! field with a documented default, so deployments (and tests) can tune them
//! without touching the services that consume them.

use std::time::Duration;

/// Default throttle window for repeated fetches of the same resource.
const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(60);

/// Default background sync interval.
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default retry ceiling for read-path fetches.
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default base delay for linear retry backoff.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Default trailing-edge debounce delay for push-triggered refreshes.
const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

/// Default cooldown between push-triggered refreshes of one category.
const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(5);

/// Cache key under which the last authenticated identity is persisted.
const DEFAULT_IDENTITY_CACHE_KEY: &str = "foyer.identity";

/// Configuration for the Foyer sync engine.
///
/// Construct with [`SyncConfig::new`] and tune with the `with_*` builders.
///
/// # Example
///
/// ```
/// use foyer_sync::config::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::new("https://api.foyer.club")
///     .with_sync_interval(Duration::from_secs(120))
///     .with_max_retries(1);
/// assert_eq!(config.max_retries, 1);
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the Foyer REST API.
    pub base_url: String,
    /// Suppress a repeated fetch of the same resource within this window,
    /// unless the fetch is itself a retry. Defaults to **60 seconds**.
    pub throttle_window: Duration,
    /// Interval between background sync passes. Defaults to **5 minutes**.
    pub sync_interval: Duration,
    /// Timeout applied to every network call. A request aborted by this
    /// timeout is a soft failure: it falls back to cache and does not count
    /// toward the retry-failure budget. Defaults to **10 seconds**.
    pub request_timeout: Duration,
    /// Maximum number of retries for a failed read-path fetch.
    /// Defaults to **2**.
    pub max_retries: u32,
    /// Base delay for linear retry backoff (`attempt × base`).
    /// Defaults to **500 milliseconds**.
    pub retry_backoff_base: Duration,
    /// Trailing-edge debounce delay for push-triggered refreshes.
    /// Defaults to **500 milliseconds**.
    pub debounce_delay: Duration,
    /// Minimum spacing between push-triggered refreshes of one event
    /// category. Defaults to **5 seconds**.
    pub refresh_cooldown: Duration,
    /// Cache key under which the authenticated identity is persisted.
    pub identity_cache_key: String,
}

impl SyncConfig {
    /// Create a configuration for the given API base URL with default values.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            throttle_window: DEFAULT_THROTTLE_WINDOW,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_base: DEFAULT_BACKOFF_BASE,
            debounce_delay: DEFAULT_DEBOUNCE_DELAY,
            refresh_cooldown: DEFAULT_REFRESH_COOLDOWN,
            identity_cache_key: DEFAULT_IDENTITY_CACHE_KEY.to_string(),
        }
    }

    /// Set the fetch throttle window.
    #[must_use]
    pub fn with_throttle_window(mut self, window: Duration) -> Self {
        self.throttle_window = window;
        self
    }

    /// Set the background sync interval. Values below 1 second are clamped
    /// to 1 second (a zero interval would spin the timer task).
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval.max(Duration::from_secs(1));
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the read-path retry ceiling.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for linear retry backoff.
    #[must_use]
    pub fn with_retry_backoff_base(mut self, base: Duration) -> Self {
        self.retry_backoff_base = base;
        self
    }

    /// Set the trailing-edge debounce delay.
    #[must_use]
    pub fn with_debounce_delay(mut self, delay: Duration) -> Self {
        self.debounce_delay = delay;
        self
    }

    /// Set the refresh cooldown window.
    #[must_use]
    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.refresh_cooldown = cooldown;
        self
    }

    /// Set the identity cache key.
    #[must_use]
    pub fn with_identity_cache_key(mut self, key: impl Into<String>) -> Self {
        self.identity_cache_key = key.into();
        self
    }
}
