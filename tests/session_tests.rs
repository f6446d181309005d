#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for session resolution: the one-shot state machine,
//! the login/probe race, and email-mismatch purging.

mod common;

use std::sync::Arc;
use std::time::Duration;

use foyer_sync::config::SyncConfig;
use foyer_sync::model::MemberProfile;
use foyer_sync::session::{SessionPhase, SessionResolver, SessionStore};
use foyer_sync::store::{self, CacheStore, MemoryStore};
use foyer_sync::Role;

use common::{login_json, probe_json, profile, MockGateway, Scripted};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

const IDENTITY_KEY: &str = "foyer.identity";

struct Harness {
    gateway: Arc<MockGateway>,
    cache: Arc<MemoryStore>,
    session: Arc<SessionStore>,
    resolver: SessionResolver,
}

fn harness() -> Harness {
    let gateway = Arc::new(MockGateway::new());
    let cache = Arc::new(MemoryStore::new());
    let session = Arc::new(SessionStore::new());
    let resolver = SessionResolver::new(
        Arc::clone(&gateway) as Arc<dyn foyer_sync::Gateway>,
        Arc::clone(&cache) as Arc<dyn CacheStore>,
        Arc::clone(&session),
        SyncConfig::new("https://api.test").with_request_timeout(Duration::from_millis(300)),
    );
    Harness {
        gateway,
        cache,
        session,
        resolver,
    }
}

// ════════════════════════════════════════════════════════════════════
// Resolution paths
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn authenticated_probe_installs_identity() {
    let h = harness();
    let avery = profile("avery@foyer.club", Role::Member);
    h.gateway
        .script("GET /session", Scripted::Status(200, probe_json(Some(&avery))));

    h.resolver.resolve().await;

    let snap = h.session.snapshot();
    assert_eq!(snap.phase, SessionPhase::Ready);
    assert!(snap.session_checked);
    assert_eq!(snap.identity.unwrap().email, "avery@foyer.club");
    // The identity was persisted for the next reload.
    let persisted: MemberProfile = store::load_typed(&*h.cache, IDENTITY_KEY).unwrap();
    assert_eq!(persisted.email, "avery@foyer.club");
}

#[tokio::test]
async fn probe_transport_failure_degrades_to_cache_without_clearing_it() {
    let h = harness();
    let cached = profile("cached@foyer.club", Role::Staff);
    store::save_typed(&*h.cache, IDENTITY_KEY, &cached);
    h.gateway.script("GET /session", Scripted::TransportError("dns".into()));

    h.resolver.resolve().await;

    let snap = h.session.snapshot();
    assert!(snap.session_checked, "resolution must terminate on failure");
    assert_eq!(snap.identity.unwrap().email, "cached@foyer.club");
    assert!(h.cache.load(IDENTITY_KEY).is_some());
}

#[tokio::test]
async fn probe_timeout_never_blocks_resolution() {
    let h = harness();
    h.gateway.script("GET /session", Scripted::Hang);

    h.resolver.resolve().await;

    let snap = h.session.snapshot();
    assert!(snap.session_checked);
    assert!(snap.identity.is_none());
}

#[tokio::test]
async fn session_checked_flips_exactly_once_and_survives_logout() {
    let h = harness();
    let avery = profile("avery@foyer.club", Role::Member);
    h.gateway
        .script("GET /session", Scripted::Status(200, probe_json(Some(&avery))));
    h.gateway.script("POST /logout", Scripted::Status(200, String::new()));

    h.resolver.resolve().await;
    assert!(h.session.snapshot().session_checked);

    h.resolver.logout().await;
    let snap = h.session.snapshot();
    assert!(snap.identity.is_none());
    assert!(
        snap.session_checked,
        "logout must not re-trigger the loading state"
    );

    // A repeated resolve stays a no-op.
    h.resolver.resolve().await;
    assert_eq!(h.gateway.call_count("GET /session"), 1);
}

// ════════════════════════════════════════════════════════════════════
// Email-mismatch purge
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn mismatched_cached_identity_is_fully_replaced() {
    let h = harness();
    let stale = profile("a@x.com", Role::Admin);
    store::save_typed(&*h.cache, IDENTITY_KEY, &stale);

    let fresh = profile("b@x.com", Role::Member);
    h.gateway
        .script("GET /session", Scripted::Status(200, probe_json(Some(&fresh))));

    h.resolver.resolve().await;

    let snap = h.session.snapshot();
    let identity = snap.identity.unwrap();
    assert_eq!(identity.email, "b@x.com");
    assert_eq!(identity.role, Role::Member, "no field of a@x.com may leak");

    let persisted: MemberProfile = store::load_typed(&*h.cache, IDENTITY_KEY).unwrap();
    assert_eq!(persisted.email, "b@x.com");
}

#[tokio::test]
async fn case_differences_are_not_a_mismatch() {
    let h = harness();
    let cached = profile("Avery@Foyer.club", Role::Member);
    store::save_typed(&*h.cache, IDENTITY_KEY, &cached);

    let probed = profile("avery@foyer.club", Role::Member);
    h.gateway
        .script("GET /session", Scripted::Status(200, probe_json(Some(&probed))));

    h.resolver.resolve().await;
    assert_eq!(
        h.session.snapshot().identity.unwrap().email,
        "avery@foyer.club"
    );
}

// ════════════════════════════════════════════════════════════════════
// Login/probe race
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn login_that_wins_the_probe_race_is_not_cleared() {
    let h = harness();
    let jordan = profile("jordan@foyer.club", Role::Staff);

    // The probe is slow and ultimately reports "unauthenticated"; the login
    // completes while it is still in flight.
    h.gateway.script(
        "GET /session",
        Scripted::Delayed(Duration::from_millis(150), 200, probe_json(None)),
    );
    h.gateway
        .script("POST /login", Scripted::Status(200, login_json(&jordan)));

    let resolver = Arc::new(h.resolver);
    let resolve_task = {
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move { resolver.resolve().await })
    };

    // Give the probe a head start, then log in.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let logged_in = resolver.login("jordan@foyer.club").await.unwrap();
    assert_eq!(logged_in.email, "jordan@foyer.club");

    resolve_task.await.unwrap();

    let snap = h.session.snapshot();
    assert!(snap.session_checked);
    assert_eq!(
        snap.identity.expect("login must win the race").email,
        "jordan@foyer.club"
    );
    assert_eq!(snap.session_version, 1, "explicit login bumps the version");
}

#[tokio::test]
async fn unauthenticated_probe_clears_identity_when_no_login_raced() {
    let h = harness();
    let cached = profile("old@foyer.club", Role::Member);
    store::save_typed(&*h.cache, IDENTITY_KEY, &cached);
    h.gateway
        .script("GET /session", Scripted::Status(200, probe_json(None)));

    h.resolver.resolve().await;

    let snap = h.session.snapshot();
    assert!(snap.identity.is_none());
    assert!(h.cache.load(IDENTITY_KEY).is_none());
}

#[tokio::test]
async fn rejected_login_surfaces_the_server_message_and_changes_nothing() {
    let h = harness();
    h.gateway.script(
        "POST /login",
        Scripted::Status(403, r#"{"error": "membership lapsed"}"#.into()),
    );

    let err = h.resolver.login("gone@foyer.club").await.unwrap_err();
    match err {
        foyer_sync::SyncError::Rejected { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "membership lapsed");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }

    let snap = h.session.snapshot();
    assert!(snap.identity.is_none());
    assert_eq!(snap.session_version, 0);
}
