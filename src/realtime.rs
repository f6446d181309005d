//! Real-time push fan-out.
//!
//! One shared push connection serves every interested consumer in the app.
//! [`EventRegistry`] de-multiplexes arriving [`PushEvent`]s to registered
//! callbacks; [`RealtimeLink`] owns the connection's background loop and its
//! lifecycle.
//!
//! Delivery contract: events are dispatched in arrival order, each event is
//! fully fanned out before the next is handled, every currently registered
//! consumer sees the event exactly once, and a panicking consumer never
//! starves the rest. Registration and deregistration are safe at any time,
//! including from inside a callback during dispatch.
//!
//! The connection is only opened for privileged roles (`staff`/`admin`) after
//! session resolution; [`RealtimeLink::connect`] enforces both gates.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::debounce::Debouncer;
use crate::error::{Result, SyncError};
use crate::protocol::{EventCategory, PushEvent};
use crate::session::SessionSnapshot;
use crate::transport::Transport;
use crate::util::lock;

/// Timeout for the graceful shutdown of the event loop.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A registered push consumer.
pub type PushCallback = Arc<dyn Fn(&PushEvent) + Send + Sync>;

// ── Registry ────────────────────────────────────────────────────────

/// Callback registry de-multiplexing push events to consumers.
#[derive(Default)]
pub struct EventRegistry {
    callbacks: StdMutex<HashMap<String, PushCallback>>,
    last_event: StdMutex<Option<PushEvent>>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `id`, replacing any previous registration
    /// for the same id.
    pub fn register(
        &self,
        id: impl Into<String>,
        callback: impl Fn(&PushEvent) + Send + Sync + 'static,
    ) {
        lock(&self.callbacks).insert(id.into(), Arc::new(callback));
    }

    /// Remove the registration under `id`, if any.
    pub fn unregister(&self, id: &str) {
        lock(&self.callbacks).remove(id);
    }

    /// Number of registered consumers.
    pub fn len(&self) -> usize {
        lock(&self.callbacks).len()
    }

    /// Whether no consumers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recently dispatched event, kept for late subscribers and
    /// debugging.
    pub fn last_event(&self) -> Option<PushEvent> {
        lock(&self.last_event).clone()
    }

    /// Deliver `event` to every currently registered consumer.
    ///
    /// Iterates over a snapshot of the registrations, so callbacks may
    /// register or unregister (themselves included) mid-dispatch without
    /// affecting this delivery. A panicking callback is logged and isolated.
    pub fn dispatch(&self, event: PushEvent) {
        *lock(&self.last_event) = Some(event.clone());

        let consumers: Vec<(String, PushCallback)> = lock(&self.callbacks)
            .iter()
            .map(|(id, cb)| (id.clone(), Arc::clone(cb)))
            .collect();

        for (id, callback) in consumers {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                error!(consumer = %id, "push consumer panicked; continuing fan-out");
            }
        }
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("consumers", &self.len())
            .finish()
    }
}

// ── Link ────────────────────────────────────────────────────────────

/// Shared state between the link handle and the event loop.
struct LinkState {
    connected: AtomicBool,
}

/// Owner of the single push connection and its background event loop.
///
/// Dropped or shut down, the loop stops and all pending debounced refreshes
/// are cancelled. Reconnection goes through [`connect`](Self::connect) again
/// and re-checks the role gate.
pub struct RealtimeLink {
    state: Arc<LinkState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RealtimeLink {
    /// Open the push link over a connected transport.
    ///
    /// `directory_refresh` is triggered (debounced) for every
    /// directory-category event, so bulk operations cost one refetch.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionUnresolved`] before session resolution has
    /// completed, and [`SyncError::NotPermitted`] when the effective identity
    /// is missing or unprivileged.
    pub fn connect(
        transport: impl Transport,
        session: &SessionSnapshot,
        registry: Arc<EventRegistry>,
        directory_refresh: Debouncer,
    ) -> Result<Self> {
        if !session.session_checked {
            return Err(SyncError::SessionUnresolved);
        }
        if !session.is_privileged() {
            return Err(SyncError::NotPermitted);
        }

        let state = Arc::new(LinkState {
            connected: AtomicBool::new(true),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(event_loop(
            transport,
            registry,
            directory_refresh,
            Arc::clone(&state),
            shutdown_rx,
        ));

        Ok(Self {
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Whether the event loop still believes the transport is open.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Tear the link down: close the transport and stop the event loop.
    pub async fn shutdown(&mut self) {
        debug!("realtime link: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("event loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("event loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("event loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for RealtimeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeLink")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RealtimeLink {
    fn drop(&mut self) {
        // `Drop` is synchronous, so a graceful close (which awaits the
        // transport) is not possible here; aborting the task drops the
        // event loop future immediately.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Event loop ──────────────────────────────────────────────────────

/// Background loop: receive, decode, fan out, trigger debounced refreshes.
///
/// Exits when the shutdown signal fires, the transport errors, or the server
/// closes the connection.
async fn event_loop(
    mut transport: impl Transport,
    registry: Arc<EventRegistry>,
    directory_refresh: Debouncer,
    state: Arc<LinkState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("push event loop started");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        match serde_json::from_str::<PushEvent>(&text) {
                            Ok(event) => {
                                let category = event.category();
                                registry.dispatch(event);
                                if category == EventCategory::Directory {
                                    directory_refresh.trigger();
                                }
                            }
                            Err(err) => {
                                warn!(%err, raw = %text, "failed to decode push event, skipping");
                            }
                        }
                    }
                    Some(Err(err)) => {
                        error!(%err, "push transport receive error");
                        break;
                    }
                    None => {
                        debug!("push channel closed by server");
                        break;
                    }
                }
            }
        }
    }

    directory_refresh.cancel();
    state.connected.store(false, Ordering::Release);
    debug!("push event loop exited");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::model::{MemberProfile, MemberStatus, Role};
    use crate::session::{SessionPhase, SessionSnapshot};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    fn booking_event(id: &str) -> PushEvent {
        PushEvent::Booking {
            resource_id: Some(id.into()),
            member_id: None,
            status: None,
            timestamp: None,
        }
    }

    #[test]
    fn dispatch_reaches_every_consumer_even_when_one_panics() {
        let registry = EventRegistry::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let delivered = Arc::clone(&delivered);
            registry.register(format!("consumer-{i}"), move |_event| {
                delivered.fetch_add(1, Ordering::SeqCst);
            });
        }
        registry.register("faulty", |_event| panic!("consumer bug"));
        {
            let delivered = Arc::clone(&delivered);
            registry.register("after-faulty", move |_event| {
                delivered.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.dispatch(booking_event("b-1"));
        assert_eq!(delivered.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn unregister_during_dispatch_is_safe() {
        let registry = Arc::new(EventRegistry::new());
        let delivered = Arc::new(AtomicUsize::new(0));

        {
            let registry_handle = Arc::clone(&registry);
            let delivered = Arc::clone(&delivered);
            registry.register("self-removing", move |_event| {
                delivered.fetch_add(1, Ordering::SeqCst);
                registry_handle.unregister("self-removing");
            });
        }

        registry.dispatch(booking_event("b-1"));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());

        // A second dispatch no longer reaches the removed consumer.
        registry.dispatch(booking_event("b-2"));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_during_dispatch_does_not_receive_the_current_event() {
        let registry = Arc::new(EventRegistry::new());
        let late_deliveries = Arc::new(AtomicUsize::new(0));

        {
            let registry_handle = Arc::clone(&registry);
            let late_deliveries = Arc::clone(&late_deliveries);
            registry.register("recruiter", move |_event| {
                let late_deliveries = Arc::clone(&late_deliveries);
                registry_handle.register("late", move |_event| {
                    late_deliveries.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        registry.dispatch(booking_event("b-1"));
        assert_eq!(late_deliveries.load(Ordering::SeqCst), 0);

        registry.dispatch(booking_event("b-2"));
        assert_eq!(late_deliveries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn last_event_is_retained_for_late_subscribers() {
        let registry = EventRegistry::new();
        assert!(registry.last_event().is_none());

        registry.dispatch(booking_event("b-7"));
        let last = registry.last_event().unwrap();
        assert_eq!(last.resource_id(), Some("b-7"));
    }

    // ── Link gating ─────────────────────────────────────────────────

    struct IdleTransport;

    #[async_trait]
    impl Transport for IdleTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), SyncError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SyncError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), SyncError> {
            Ok(())
        }
    }

    fn snapshot(role: Option<Role>, checked: bool) -> SessionSnapshot {
        SessionSnapshot {
            phase: if checked {
                SessionPhase::Ready
            } else {
                SessionPhase::Booting
            },
            identity: role.map(|role| MemberProfile {
                id: "m-1".into(),
                name: "Test".into(),
                email: "test@foyer.club".into(),
                tier: None,
                tags: vec![],
                role,
                status: MemberStatus::Active,
                stripe_customer_id: None,
                mindbody_client_id: None,
                visit_count: 0,
                events_attended: 0,
            }),
            view_as: None,
            session_checked: checked,
            session_version: 0,
        }
    }

    fn noop_debouncer() -> Debouncer {
        Debouncer::new(Duration::from_millis(10), Duration::from_millis(10), || {})
    }

    #[tokio::test]
    async fn connect_requires_resolved_session() {
        let err = RealtimeLink::connect(
            IdleTransport,
            &snapshot(Some(Role::Admin), false),
            Arc::new(EventRegistry::new()),
            noop_debouncer(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::SessionUnresolved));
    }

    #[tokio::test]
    async fn connect_requires_privileged_role() {
        let err = RealtimeLink::connect(
            IdleTransport,
            &snapshot(Some(Role::Member), true),
            Arc::new(EventRegistry::new()),
            noop_debouncer(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::NotPermitted));

        let err = RealtimeLink::connect(
            IdleTransport,
            &snapshot(None, true),
            Arc::new(EventRegistry::new()),
            noop_debouncer(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::NotPermitted));
    }

    #[tokio::test]
    async fn connect_succeeds_for_staff_and_shuts_down() {
        let mut link = RealtimeLink::connect(
            IdleTransport,
            &snapshot(Some(Role::Staff), true),
            Arc::new(EventRegistry::new()),
            noop_debouncer(),
        )
        .unwrap();
        assert!(link.is_connected());

        link.shutdown().await;
        assert!(!link.is_connected());
    }

    // ── Event loop over a scripted transport ────────────────────────

    struct ScriptedTransport {
        incoming: VecDeque<Option<std::result::Result<String, SyncError>>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), SyncError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SyncError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), SyncError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_fan_out_in_arrival_order() {
        let registry = Arc::new(EventRegistry::new());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            registry.register("order-probe", move |event| {
                lock(&seen).push(event.resource_id().unwrap_or("").to_string());
            });
        }

        let transport = ScriptedTransport {
            incoming: VecDeque::from(vec![
                Some(Ok(r#"{"eventType":"booking","resourceId":"b-1"}"#.into())),
                Some(Ok("not json at all".into())),
                Some(Ok(r#"{"eventType":"booking","resourceId":"b-2"}"#.into())),
                None,
            ]),
        };

        let mut link = RealtimeLink::connect(
            transport,
            &snapshot(Some(Role::Admin), true),
            Arc::clone(&registry),
            noop_debouncer(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*lock(&seen), vec!["b-1".to_string(), "b-2".to_string()]);
        // The scripted None closed the channel.
        assert!(!link.is_connected());

        link.shutdown().await;
    }

    #[tokio::test]
    async fn directory_events_trigger_the_debounced_refresh() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let action = {
            let refreshes = Arc::clone(&refreshes);
            move || {
                refreshes.fetch_add(1, Ordering::SeqCst);
            }
        };

        let mut incoming: Vec<Option<std::result::Result<String, SyncError>>> = Vec::new();
        for i in 0..10 {
            incoming.push(Some(Ok(format!(
                r#"{{"eventType":"directory-update","resourceId":"m-{i}"}}"#
            ))));
        }

        let transport = ScriptedTransport {
            incoming: VecDeque::from(incoming),
        };

        let mut link = RealtimeLink::connect(
            transport,
            &snapshot(Some(Role::Staff), true),
            Arc::new(EventRegistry::new()),
            Debouncer::new(Duration::from_millis(30), Duration::from_millis(500), action),
        )
        .unwrap();

        // All ten events land in one burst; the debouncer coalesces them.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        link.shutdown().await;
    }
}
