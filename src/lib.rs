//! # Foyer Sync
//!
//! Client-side state synchronization engine for the Foyer membership
//! platform.
//!
//! This crate keeps client-visible state (bookings, members, announcements,
//! café menu, notification counts) consistent across optimistic local
//! mutations, server-confirmed responses, server-pushed real-time events,
//! and background refresh — while tolerating session races, stale caches,
//! and partial failures.
//!
//! ## Features
//!
//! - **Explicit lifecycle** — one [`SyncEngine`] instance with
//!   `new`/`bootstrap`/`stop`; no hidden module state
//! - **Gateway- and transport-agnostic** — implement [`Gateway`] for the REST
//!   side and [`Transport`] for the push channel; `gateway-http` and
//!   `transport-websocket` (both default) provide `reqwest` and
//!   `tokio-tungstenite` backends
//! - **Optimistic writes** — per-resource coordinators apply, confirm, or
//!   roll back every mutation
//! - **Typed push events** — a closed [`PushEvent`] union fans out to
//!   registered consumers, debounced per category
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), foyer_sync::SyncError> {
//! use std::sync::Arc;
//! use foyer_sync::{HttpGateway, MemoryStore, SyncConfig, SyncEngine};
//!
//! let gateway = Arc::new(HttpGateway::new("https://api.foyer.club")?);
//! let engine = SyncEngine::new(gateway, Arc::new(MemoryStore::new()), SyncConfig::new("https://api.foyer.club"));
//!
//! engine.bootstrap().await;
//! if engine.session().snapshot().is_privileged() {
//!     let transport =
//!         foyer_sync::WebSocketTransport::connect("wss://api.foyer.club/push").await?;
//!     engine.connect_push(transport).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod gateways;
pub mod model;
pub mod mutation;
pub mod notices;
pub mod protocol;
pub mod realtime;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod transport;
pub mod transports;
pub mod views;

mod util;

// Re-export primary types for ergonomic imports.
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::SyncError;
pub use gateway::{Gateway, GatewayResponse};
pub use model::{Announcement, Booking, CafeItem, ClubEvent, MemberProfile, Role};
pub use protocol::{EventCategory, PushEvent};
pub use realtime::EventRegistry;
pub use scheduler::{Presence, SyncScheduler};
pub use session::{SessionResolver, SessionSnapshot, SessionStore};
pub use store::{CacheStore, MemoryStore};
pub use transport::Transport;

#[cfg(feature = "gateway-http")]
pub use gateways::http::HttpGateway;

#[cfg(feature = "transport-websocket")]
pub use transports::websocket::WebSocketTransport;
