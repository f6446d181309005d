#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for Foyer sync integration tests.
//!
//! Provides a scripted [`MockGateway`] for the REST seam, a scripted
//! [`MockTransport`] for the push channel, and fixture helpers for common
//! payloads.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use foyer_sync::error::SyncError;
use foyer_sync::gateway::{Gateway, GatewayResponse};
use foyer_sync::model::{MemberProfile, MemberStatus, Priority, Role};
use foyer_sync::protocol::{LoginResponse, SessionProbe};
use foyer_sync::{Announcement, CafeItem, Transport};

// ── MockGateway ─────────────────────────────────────────────────────

/// One scripted gateway outcome.
pub enum Scripted {
    /// Respond with this status and body.
    Status(u16, String),
    /// Respond with this status and body after a delay.
    Delayed(Duration, u16, String),
    /// Fail with [`SyncError::Offline`].
    Offline,
    /// Fail with [`SyncError::Timeout`].
    Timeout,
    /// Fail with [`SyncError::TransportReceive`].
    TransportError(String),
    /// Never respond (exercises the engine-side deadline).
    Hang,
}

/// Scripted [`Gateway`] keyed by `"METHOD /path"`.
///
/// Responses for a key are consumed in script order; a request with no
/// remaining script fails with [`SyncError::Offline`].
#[derive(Default)]
pub struct MockGateway {
    scripts: StdMutex<HashMap<String, VecDeque<Scripted>>>,
    calls: StdMutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `"METHOD /path"` (e.g. `"GET /events"`).
    pub fn script(&self, key: &str, response: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(response);
    }

    /// All requests made so far, as `"METHOD /path"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests matching `key`.
    pub fn call_count(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == key)
            .count()
    }

    async fn respond(&self, key: String) -> Result<GatewayResponse, SyncError> {
        self.calls.lock().unwrap().push(key.clone());
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Scripted::Status(status, body)) => Ok(GatewayResponse::new(status, body)),
            Some(Scripted::Delayed(delay, status, body)) => {
                tokio::time::sleep(delay).await;
                Ok(GatewayResponse::new(status, body))
            }
            Some(Scripted::Offline) | None => Err(SyncError::Offline),
            Some(Scripted::Timeout) => Err(SyncError::Timeout),
            Some(Scripted::TransportError(message)) => Err(SyncError::TransportReceive(message)),
            Some(Scripted::Hang) => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn get(&self, path: &str) -> Result<GatewayResponse, SyncError> {
        self.respond(format!("GET {path}")).await
    }

    async fn post(
        &self,
        path: &str,
        _body: Option<serde_json::Value>,
    ) -> Result<GatewayResponse, SyncError> {
        self.respond(format!("POST {path}")).await
    }

    async fn put(
        &self,
        path: &str,
        _body: serde_json::Value,
    ) -> Result<GatewayResponse, SyncError> {
        self.respond(format!("PUT {path}")).await
    }

    async fn delete(&self, path: &str) -> Result<GatewayResponse, SyncError> {
        self.respond(format!("DELETE {path}")).await
    }
}

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-style mock push transport.
///
/// Scripted server frames are consumed in order by `recv()`; an explicit
/// `None` entry signals a clean close. Sent frames are recorded.
pub struct MockTransport {
    incoming: VecDeque<Option<Result<String, SyncError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new(
        incoming: Vec<Option<Result<String, SyncError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SyncError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // No more scripted frames — hang so the event loop stays alive
            // until shutdown.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

/// A member profile with the given email and role.
pub fn profile(email: &str, role: Role) -> MemberProfile {
    MemberProfile {
        id: format!("m-{email}"),
        name: "Test Member".into(),
        email: email.into(),
        tier: Some("standard".into()),
        tags: vec![],
        role,
        status: MemberStatus::Active,
        stripe_customer_id: None,
        mindbody_client_id: None,
        visit_count: 0,
        events_attended: 0,
    }
}

/// JSON body for `GET /session`.
pub fn probe_json(member: Option<&MemberProfile>) -> String {
    serde_json::to_string(&SessionProbe {
        authenticated: member.is_some(),
        member: member.cloned(),
    })
    .expect("probe_json serialization")
}

/// JSON body for a successful `POST /login`.
pub fn login_json(member: &MemberProfile) -> String {
    serde_json::to_string(&LoginResponse {
        member: member.clone(),
    })
    .expect("login_json serialization")
}

/// A café item fixture.
pub fn cafe_item(id: &str, name: &str) -> CafeItem {
    CafeItem {
        id: id.into(),
        name: name.into(),
        category: Some("coffee".into()),
        price: 4.5,
        available: true,
    }
}

/// An announcement fixture with no date bounds.
pub fn announcement(id: &str, priority: Priority) -> Announcement {
    Announcement {
        id: id.into(),
        title: format!("Announcement {id}"),
        body: "Details inside.".into(),
        priority,
        start_date: None,
        end_date: None,
    }
}

/// JSON text frame for a directory-update push event.
pub fn directory_update_frame(resource_id: &str) -> String {
    format!(r#"{{"eventType":"directory-update","resourceId":"{resource_id}"}}"#)
}

/// JSON text frame for a booking push event.
pub fn booking_frame(resource_id: &str) -> String {
    format!(r#"{{"eventType":"booking","resourceId":"{resource_id}","status":"pending"}}"#)
}
