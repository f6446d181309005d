//! Engine composition root.
//!
//! [`SyncEngine`] wires the cache, gateway, session resolver, scheduler,
//! mutation coordinators, and push registry into one explicitly ordered
//! lifecycle:
//!
//! 1. [`bootstrap`](SyncEngine::bootstrap) runs the one-shot session
//!    resolver, then starts the background scheduler — nothing role-gated
//!    happens before `session_checked` is true;
//! 2. user writes flow through the per-resource mutation coordinators;
//! 3. a push connection may be attached with
//!    [`connect_push`](SyncEngine::connect_push), which enforces the
//!    privileged-role gate and is torn down automatically when the effective
//!    identity loses the privilege (view-as switch, logout).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::debounce::Debouncer;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::model::{Announcement, CafeItem, ClubEvent, MemberProfile};
use crate::mutation::{Collection, MutationCoordinator};
use crate::notices::DismissedNotices;
use crate::realtime::{EventRegistry, RealtimeLink};
use crate::scheduler::{Presence, SyncScheduler};
use crate::session::{SessionResolver, SessionStore};
use crate::store::{self, keys, CacheStore};
use crate::transport::Transport;
use crate::util::lock;

const EVENTS_PATH: &str = "/events";
const CAFE_MENU_PATH: &str = "/cafe-menu";
const ANNOUNCEMENTS_PATH: &str = "/announcements";
const NOTIFICATIONS_PATH: &str = "/notifications";
const DIRECTORY_PATH: &str = "/directory";

/// The assembled Foyer sync engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: SyncConfig,
    gateway: Arc<dyn Gateway>,
    cache: Arc<dyn CacheStore>,
    presence: Presence,
    session: Arc<SessionStore>,
    resolver: SessionResolver,
    scheduler: SyncScheduler,
    registry: Arc<EventRegistry>,
    cafe_menu: MutationCoordinator<CafeItem>,
    announcements: MutationCoordinator<Announcement>,
    events: MutationCoordinator<ClubEvent>,
    link: AsyncMutex<Option<RealtimeLink>>,
    bootstrapped: AtomicBool,
    background: StdMutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl SyncEngine {
    /// Assemble an engine over the given gateway and cache.
    ///
    /// Collections paint from cache immediately: any previously synced
    /// events, menu, or announcements are loaded before the first network
    /// round trip.
    pub fn new(gateway: Arc<dyn Gateway>, cache: Arc<dyn CacheStore>, config: SyncConfig) -> Self {
        let presence = Presence::new();
        let session = Arc::new(SessionStore::new());
        let resolver = SessionResolver::new(
            Arc::clone(&gateway),
            Arc::clone(&cache),
            Arc::clone(&session),
            config.clone(),
        );
        let scheduler = SyncScheduler::new(
            Arc::clone(&gateway),
            Arc::clone(&cache),
            presence.clone(),
            config.clone(),
        );
        scheduler.track(keys::EVENTS, EVENTS_PATH);
        scheduler.track(keys::CAFE_MENU, CAFE_MENU_PATH);
        scheduler.track(keys::ANNOUNCEMENTS, ANNOUNCEMENTS_PATH);
        scheduler.track(keys::NOTIFICATIONS, NOTIFICATIONS_PATH);

        let cafe_menu = MutationCoordinator::new(
            Arc::clone(&gateway),
            Arc::new(Collection::new(
                store::load_typed(&*cache, keys::CAFE_MENU).unwrap_or_default(),
            )),
            CAFE_MENU_PATH,
            config.request_timeout,
        );
        let announcements = MutationCoordinator::new(
            Arc::clone(&gateway),
            Arc::new(Collection::new(
                store::load_typed(&*cache, keys::ANNOUNCEMENTS).unwrap_or_default(),
            )),
            ANNOUNCEMENTS_PATH,
            config.request_timeout,
        );
        let events = MutationCoordinator::new(
            Arc::clone(&gateway),
            Arc::new(Collection::new(
                store::load_typed(&*cache, keys::EVENTS).unwrap_or_default(),
            )),
            EVENTS_PATH,
            config.request_timeout,
        );

        Self {
            inner: Arc::new(EngineInner {
                config,
                gateway,
                cache,
                presence,
                session,
                resolver,
                scheduler,
                registry: Arc::new(EventRegistry::new()),
                cafe_menu,
                announcements,
                events,
                link: AsyncMutex::new(None),
                bootstrapped: AtomicBool::new(false),
                background: StdMutex::new(Vec::new()),
            }),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Session state store.
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.inner.session
    }

    /// Background sync scheduler.
    pub fn scheduler(&self) -> &SyncScheduler {
        &self.inner.scheduler
    }

    /// Push-event fan-out registry.
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.inner.registry
    }

    /// Connectivity/visibility flags.
    pub fn presence(&self) -> &Presence {
        &self.inner.presence
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Café menu coordinator.
    pub fn cafe_menu(&self) -> &MutationCoordinator<CafeItem> {
        &self.inner.cafe_menu
    }

    /// Announcements coordinator.
    pub fn announcements(&self) -> &MutationCoordinator<Announcement> {
        &self.inner.announcements
    }

    /// Club events coordinator.
    pub fn events(&self) -> &MutationCoordinator<ClubEvent> {
        &self.inner.events
    }

    /// The REST gateway shared by every service.
    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.inner.gateway
    }

    /// The persistent cache store.
    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.inner.cache
    }

    /// Dismissed-notice set for the current effective identity, or `None`
    /// when nobody is logged in.
    pub fn dismissed_notices(&self) -> Option<DismissedNotices> {
        let snapshot = self.inner.session.snapshot();
        let email = snapshot.effective()?.email.clone();
        Some(DismissedNotices::new(
            Arc::clone(&self.inner.gateway),
            Arc::clone(&self.inner.cache),
            &email,
            self.inner.config.request_timeout,
        ))
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Resolve the session, then start the background machinery. Later calls
    /// are no-ops.
    pub async fn bootstrap(&self) {
        if self.inner.bootstrapped.swap(true, Ordering::SeqCst) {
            debug!("engine already bootstrapped");
            return;
        }

        // Session resolution strictly precedes anything role-gated.
        self.inner.resolver.resolve().await;

        if self.inner.session.snapshot().is_privileged() {
            self.inner.scheduler.track(keys::DIRECTORY, DIRECTORY_PATH);
        }
        self.inner.scheduler.start();

        let pump = tokio::spawn(run_update_pump(Arc::clone(&self.inner)));
        let gate = tokio::spawn(run_privilege_gate(Arc::clone(&self.inner)));
        lock(&self.inner.background).extend([pump, gate]);

        info!("sync engine bootstrapped");
    }

    /// Stop all background work and drop any push connection.
    pub async fn stop(&self) {
        self.inner.scheduler.stop();
        self.disconnect_push().await;
        for handle in lock(&self.inner.background).drain(..) {
            handle.abort();
        }
    }

    /// Explicit login, delegated to the session resolver (the resolver's
    /// race latch protects this identity from a concurrent startup probe).
    ///
    /// # Errors
    ///
    /// Propagates the resolver's rejection or transport error.
    pub async fn login(&self, email: &str) -> Result<MemberProfile> {
        self.inner.resolver.login(email).await
    }

    /// Log out and tear down everything identity-bound.
    pub async fn logout(&self) {
        self.disconnect_push().await;
        self.inner.scheduler.untrack(keys::DIRECTORY);
        self.inner.resolver.logout().await;
    }

    // ── Push channel ────────────────────────────────────────────────

    /// Attach a push connection over `transport`.
    ///
    /// Idempotent while a connection is live. The role gate applies: only a
    /// resolved, privileged session may hold the connection.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionUnresolved`](crate::error::SyncError::SessionUnresolved)
    /// or [`SyncError::NotPermitted`](crate::error::SyncError::NotPermitted)
    /// when the gate rejects the current session.
    pub async fn connect_push(&self, transport: impl Transport) -> Result<()> {
        let mut slot = self.inner.link.lock().await;
        if slot.as_ref().is_some_and(RealtimeLink::is_connected) {
            debug!("push channel already connected");
            return Ok(());
        }

        let snapshot = self.inner.session.snapshot();
        let refresh = self.directory_refresh_debouncer();
        let link = RealtimeLink::connect(
            transport,
            &snapshot,
            Arc::clone(&self.inner.registry),
            refresh,
        )?;
        *slot = Some(link);
        info!("push channel connected");
        Ok(())
    }

    /// Drop the push connection, if any.
    pub async fn disconnect_push(&self) {
        let mut slot = self.inner.link.lock().await;
        if let Some(mut link) = slot.take() {
            link.shutdown().await;
        }
    }

    /// Whether a live push connection is attached.
    pub async fn push_connected(&self) -> bool {
        self.inner
            .link
            .lock()
            .await
            .as_ref()
            .is_some_and(RealtimeLink::is_connected)
    }

    /// Debouncer that refreshes the directory once per event burst.
    fn directory_refresh_debouncer(&self) -> Debouncer {
        let scheduler = self.inner.scheduler.clone();
        Debouncer::new(
            self.inner.config.debounce_delay,
            self.inner.config.refresh_cooldown,
            move || {
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    scheduler.invalidate(keys::DIRECTORY);
                    let _ = scheduler.fetch_and_cache(keys::DIRECTORY, DIRECTORY_PATH).await;
                });
            },
        )
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("bootstrapped", &self.inner.bootstrapped.load(Ordering::Relaxed))
            .field("scheduler_running", &self.inner.scheduler.is_running())
            .finish()
    }
}

/// Apply scheduler refreshes to the typed collections, so a background
/// refetch corrects any optimistic residue.
async fn run_update_pump(inner: Arc<EngineInner>) {
    let mut updates = inner.scheduler.subscribe();
    loop {
        match updates.recv().await {
            Ok(update) => {
                let apply = || -> std::result::Result<(), serde_json::Error> {
                    match update.key.as_str() {
                        keys::CAFE_MENU => inner
                            .cafe_menu
                            .collection()
                            .replace_all(serde_json::from_value(update.data.clone())?),
                        keys::ANNOUNCEMENTS => inner
                            .announcements
                            .collection()
                            .replace_all(serde_json::from_value(update.data.clone())?),
                        keys::EVENTS => inner
                            .events
                            .collection()
                            .replace_all(serde_json::from_value(update.data.clone())?),
                        _ => {}
                    }
                    Ok(())
                };
                if let Err(err) = apply() {
                    warn!(key = %update.key, %err, "refreshed payload did not match collection shape");
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "update pump lagged behind the scheduler");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Tear the push link down the moment the effective identity loses its
/// privilege (view-as switch to a member, logout).
async fn run_privilege_gate(inner: Arc<EngineInner>) {
    let mut sessions = inner.session.subscribe();
    loop {
        if sessions.changed().await.is_err() {
            break;
        }
        let snapshot = sessions.borrow_and_update().clone();
        if snapshot.is_privileged() {
            continue;
        }
        let mut slot = inner.link.lock().await;
        if let Some(mut link) = slot.take() {
            info!("effective role lost push privilege, closing push channel");
            link.shutdown().await;
        }
    }
}
