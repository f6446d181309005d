//! Session resolution and identity state.
//!
//! [`SessionStore`] is the single point of truth for "who is logged in":
//! a reactive snapshot store that every session-gated effect reads through
//! [`SessionStore::snapshot`] or watches through [`SessionStore::subscribe`].
//!
//! [`SessionResolver`] is the one-shot bootstrap procedure that reconciles
//! three identity sources — the server session probe, the in-memory store,
//! and the persistent identity cache — into one authoritative identity. It is
//! an explicit state machine: the store's phase moves
//! `Booting → ResolvingSession → Ready` exactly once per application
//! lifetime, and `session_checked` never returns to `false` afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::gateway::Gateway;
use crate::model::{MemberProfile, Role};
use crate::protocol::{LoginRequest, LoginResponse, SessionProbe};
use crate::store::{self, CacheStore};
use crate::util::lock;

// ── Snapshot ────────────────────────────────────────────────────────

/// Lifecycle phase of session resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Application constructed, resolver not started.
    Booting,
    /// The session probe is in flight.
    ResolvingSession,
    /// Resolution finished (with or without an identity).
    Ready,
}

/// A point-in-time view of the session state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    /// The authoritative identity, if any.
    pub identity: Option<MemberProfile>,
    /// Admin-only overlay identity; never replaces `identity`.
    pub view_as: Option<MemberProfile>,
    /// Whether the one-shot resolution has completed. Transitions
    /// `false → true` exactly once and never resets.
    pub session_checked: bool,
    /// Incremented on every successful explicit login, so dependent effects
    /// can distinguish "still loading" from "confirmed logged out".
    pub session_version: u64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Booting,
            identity: None,
            view_as: None,
            session_checked: false,
            session_version: 0,
        }
    }
}

impl SessionSnapshot {
    /// The identity currently presented to the UI: the view-as overlay when
    /// active, the authoritative identity otherwise.
    pub fn effective(&self) -> Option<&MemberProfile> {
        self.view_as.as_ref().or(self.identity.as_ref())
    }

    /// Whether the effective identity may hold a push connection.
    pub fn is_privileged(&self) -> bool {
        self.effective().is_some_and(|m| m.role.is_privileged())
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Reactive single point of truth for session state.
///
/// All mutation goes through the resolver and the view-as methods below;
/// consumers only read snapshots or watch for changes.
#[derive(Debug)]
pub struct SessionStore {
    tx: watch::Sender<SessionSnapshot>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create a store in the `Booting` phase with no identity.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::default());
        Self { tx }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    /// Watch for snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        self.tx.send_modify(f);
    }

    /// Overlay another member's identity on top of the authoritative one.
    ///
    /// The authoritative identity stays installed and is restored by
    /// [`exit_view_as`](Self::exit_view_as).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotPermitted`] unless the authoritative identity
    /// is an admin.
    pub fn enter_view_as(&self, profile: MemberProfile) -> Result<()> {
        let authoritative_role = self.snapshot().identity.map(|m| m.role);
        if authoritative_role != Some(Role::Admin) {
            return Err(SyncError::NotPermitted);
        }
        info!(target = %profile.email, "entering view-as overlay");
        self.update(|s| s.view_as = Some(profile));
        Ok(())
    }

    /// Drop the view-as overlay, restoring the authoritative identity.
    pub fn exit_view_as(&self) {
        self.update(|s| {
            if s.view_as.take().is_some() {
                debug!("view-as overlay cleared");
            }
        });
    }
}

// ── Login/probe race latch ──────────────────────────────────────────

/// Tracks whether an explicit login is racing the startup probe.
///
/// The flag is set before login's network call and cleared only by whichever
/// of {login, probe} finishes second, so the probe's "unauthenticated" branch
/// can tell a stale session apart from a login it lost the race to.
#[derive(Debug, Default)]
struct RaceLatch {
    login_in_flight: bool,
    login_settled: bool,
    probe_settled: bool,
}

// ── Resolver ────────────────────────────────────────────────────────

/// One-shot session bootstrap.
pub struct SessionResolver {
    gateway: Arc<dyn Gateway>,
    cache: Arc<dyn CacheStore>,
    session: Arc<SessionStore>,
    config: SyncConfig,
    resolved: AtomicBool,
    latch: StdMutex<RaceLatch>,
    bypass_identity: Option<MemberProfile>,
}

impl SessionResolver {
    /// Create a resolver over the given gateway, cache, and session store.
    pub fn new(
        gateway: Arc<dyn Gateway>,
        cache: Arc<dyn CacheStore>,
        session: Arc<SessionStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            gateway,
            cache,
            session,
            config,
            resolved: AtomicBool::new(false),
            latch: StdMutex::new(RaceLatch::default()),
            bypass_identity: None,
        }
    }

    /// Install a fixed identity instead of probing (dev/preview builds).
    #[must_use]
    pub fn with_bypass_identity(mut self, profile: MemberProfile) -> Self {
        self.bypass_identity = Some(profile);
        self
    }

    /// Resolve the session. Runs at most once; later calls are no-ops.
    ///
    /// Always terminates with `session_checked = true`, whatever path it
    /// took — probe failures degrade to the cached identity rather than
    /// blocking the app behind a spinner.
    pub async fn resolve(&self) {
        if self.resolved.swap(true, Ordering::SeqCst) {
            debug!("session already resolved, ignoring repeat call");
            return;
        }
        self.session.update(|s| s.phase = SessionPhase::ResolvingSession);

        if let Some(profile) = &self.bypass_identity {
            info!(email = %profile.email, "installing bypass identity");
            let profile = profile.clone();
            self.session.update(move |s| s.identity = Some(profile));
            self.finish();
            return;
        }

        // Bridge the reload gap: paint the last known identity from the
        // persistent cache while the probe is in flight.
        self.hydrate_from_cache();

        let probe = tokio::time::timeout(self.config.request_timeout, self.gateway.get("/session"))
            .await;

        match probe {
            Ok(Ok(resp)) if resp.is_success() => match resp.json::<SessionProbe>() {
                Ok(SessionProbe {
                    authenticated: true,
                    member: Some(member),
                }) => self.install_probed_identity(member),
                Ok(_) => self.handle_unauthenticated(),
                Err(err) => {
                    warn!(%err, "session probe body was undecodable, keeping cached identity");
                }
            },
            Ok(Ok(resp)) => {
                warn!(status = resp.status, "session probe failed, falling back to cache");
                self.hydrate_from_cache();
            }
            Ok(Err(err)) => {
                warn!(%err, "session probe transport error, falling back to cache");
                self.hydrate_from_cache();
            }
            Err(_elapsed) => {
                warn!("session probe timed out, falling back to cache");
                self.hydrate_from_cache();
            }
        }

        self.settle_probe();
        self.finish();
    }

    /// Explicit login. Safe to call while the startup probe is in flight:
    /// if the probe later reports "unauthenticated", the identity installed
    /// here survives (login wins the race).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Rejected`] with the server's message, or a
    /// transport error. On failure no local state changes.
    pub async fn login(&self, email: &str) -> Result<MemberProfile> {
        {
            let mut latch = lock(&self.latch);
            latch.login_in_flight = true;
            latch.login_settled = false;
        }

        let outcome = self.login_call(email).await;

        match &outcome {
            Ok(member) => {
                info!(email = %member.email, "login succeeded");
                store::save_typed(&*self.cache, &self.config.identity_cache_key, member);
                let installed = member.clone();
                self.session.update(move |s| {
                    s.identity = Some(installed);
                    s.view_as = None;
                    s.session_version += 1;
                });
                self.settle_login();
            }
            Err(err) => {
                debug!(%err, "login failed");
                // A failed login protects nothing; let the probe clear stale
                // identities as usual.
                let mut latch = lock(&self.latch);
                latch.login_in_flight = false;
                latch.login_settled = true;
            }
        }

        outcome
    }

    /// Log out: best-effort server call, then unconditional local teardown.
    ///
    /// `session_checked` stays `true` — logout is a state change, not a
    /// return to the loading screen.
    pub async fn logout(&self) {
        let result = tokio::time::timeout(
            self.config.request_timeout,
            self.gateway.post("/logout", None),
        )
        .await;
        match result {
            Ok(Ok(resp)) if resp.is_success() => debug!("logout acknowledged by server"),
            Ok(Ok(resp)) => warn!(status = resp.status, "logout rejected, clearing locally"),
            Ok(Err(err)) => warn!(%err, "logout transport error, clearing locally"),
            Err(_) => warn!("logout timed out, clearing locally"),
        }

        self.cache.remove(&self.config.identity_cache_key);
        self.session.update(|s| {
            s.identity = None;
            s.view_as = None;
        });
    }

    // ── Internal steps ──────────────────────────────────────────────

    async fn login_call(&self, email: &str) -> Result<MemberProfile> {
        let body = serde_json::to_value(LoginRequest {
            email: email.to_string(),
        })?;
        let resp = tokio::time::timeout(
            self.config.request_timeout,
            self.gateway.post("/login", Some(body)),
        )
        .await
        .map_err(|_| SyncError::Timeout)??;

        if !resp.is_success() {
            return Err(resp.rejection());
        }
        let login: LoginResponse = resp.json()?;
        Ok(login.member)
    }

    /// Install the probe's authoritative identity, purging a cached identity
    /// whose email disagrees (prevents cross-account leakage on a shared
    /// device).
    fn install_probed_identity(&self, member: MemberProfile) {
        let previous = self
            .session
            .snapshot()
            .identity
            .or_else(|| store::load_typed(&*self.cache, &self.config.identity_cache_key));

        if let Some(previous) = previous {
            if !previous.email_matches(&member.email) {
                warn!(
                    cached = %previous.email,
                    probed = %member.email,
                    "cached identity email mismatch, purging stale cache"
                );
                self.cache.remove(&self.config.identity_cache_key);
            }
        }

        store::save_typed(&*self.cache, &self.config.identity_cache_key, &member);
        info!(email = %member.email, "session probe confirmed identity");
        self.session.update(move |s| s.identity = Some(member));
    }

    /// The probe reported no session. Clear local identity unless an explicit
    /// login raced this probe, in which case the login's identity stands.
    fn handle_unauthenticated(&self) {
        let login_raced = lock(&self.latch).login_in_flight;
        if login_raced {
            debug!("probe returned unauthenticated but a login raced it; keeping identity");
            return;
        }
        debug!("probe returned unauthenticated, clearing persisted identity");
        self.cache.remove(&self.config.identity_cache_key);
        self.session.update(|s| s.identity = None);
    }

    /// Load the persisted identity into the in-memory store if it is empty.
    /// Clears nothing.
    fn hydrate_from_cache(&self) {
        if self.session.snapshot().identity.is_some() {
            return;
        }
        if let Some(member) =
            store::load_typed::<MemberProfile>(&*self.cache, &self.config.identity_cache_key)
        {
            debug!(email = %member.email, "hydrated identity from persistent cache");
            self.session.update(move |s| s.identity = Some(member));
        }
    }

    fn settle_probe(&self) {
        let mut latch = lock(&self.latch);
        latch.probe_settled = true;
        if latch.login_settled {
            latch.login_in_flight = false;
        }
    }

    fn settle_login(&self) {
        let mut latch = lock(&self.latch);
        latch.login_settled = true;
        if latch.probe_settled {
            latch.login_in_flight = false;
        }
    }

    fn finish(&self) {
        self.session.update(|s| {
            s.session_checked = true;
            s.phase = SessionPhase::Ready;
        });
    }
}

impl std::fmt::Debug for SessionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResolver")
            .field("resolved", &self.resolved.load(Ordering::Relaxed))
            .finish()
    }
}
