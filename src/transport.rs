//! Push-channel transport abstraction.
//!
//! The [`Transport`] trait defines a bidirectional text message channel to the
//! Foyer push endpoint. Events arrive as JSON text frames; every transport
//! implementation handles message framing internally (WebSocket frames,
//! server-sent events, a scripted test double).
//!
//! # Connection Setup
//!
//! Connection setup is intentionally NOT part of this trait — different
//! transports have fundamentally different connection parameters. Construct a
//! connected transport externally, then hand it to
//! [`RealtimeLink::connect`](crate::realtime::RealtimeLink::connect) (or to
//! [`SyncEngine::connect_push`](crate::engine::SyncEngine::connect_push),
//! which also enforces the role gate).

use async_trait::async_trait;

use crate::error::SyncError;

/// A bidirectional text message channel to the Foyer push endpoint.
///
/// # Object Safety
///
/// The trait is object-safe, so `Box<dyn Transport>` works for dynamic
/// dispatch; the realtime link accepts `impl Transport` for the common case.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// polled inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data. Channel-based implementations are
/// naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// The push channel is receive-dominant, but the server accepts
    /// subscription and heartbeat frames on the same connection.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), SyncError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    /// Close the transport connection gracefully.
    ///
    /// After calling this method, subsequent calls to [`send`](Transport::send)
    /// and [`recv`](Transport::recv) may return errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), SyncError>;
}
