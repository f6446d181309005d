//! Trailing-edge debounce with cooldown.
//!
//! Push storms (bulk directory operations emit dozens of events in a burst)
//! must coalesce into a single refresh. A [`Debouncer`] runs its action once
//! per quiet period: each trigger restarts a trailing delay, and the action
//! additionally waits out a cooldown measured from its own previous run.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::util::lock;

/// Coalesces bursts of triggers into single, rate-limited action runs.
pub struct Debouncer {
    delay: Duration,
    cooldown: Duration,
    inner: Arc<DebouncerInner>,
    pending: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

struct DebouncerInner {
    action: Box<dyn Fn() + Send + Sync>,
    last_run: StdMutex<Option<Instant>>,
}

impl Debouncer {
    /// Create a debouncer that runs `action` `delay` after the last trigger,
    /// but never within `cooldown` of its previous run.
    pub fn new(delay: Duration, cooldown: Duration, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            delay,
            cooldown,
            inner: Arc::new(DebouncerInner {
                action: Box::new(action),
                last_run: StdMutex::new(None),
            }),
            pending: StdMutex::new(None),
        }
    }

    /// Request a run. Restarts the trailing delay; any number of triggers
    /// inside one burst produce exactly one run.
    pub fn trigger(&self) {
        let inner = Arc::clone(&self.inner);
        let delay = self.delay;
        let cooldown = self.cooldown;

        let mut pending = lock(&self.pending);
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let hold = (*lock(&inner.last_run))
                .map(|at| (at + cooldown).saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::ZERO);
            if !hold.is_zero() {
                debug!(?hold, "deferring debounced run for cooldown");
                tokio::time::sleep(hold).await;
            }

            *lock(&inner.last_run) = Some(Instant::now());
            (inner.action)();
        }));
    }

    /// Abort any pending run.
    pub fn cancel(&self) {
        if let Some(handle) = lock(&self.pending).take() {
            handle.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}
