//! REST gateway abstraction.
//!
//! The [`Gateway`] trait is the engine's seam to the Foyer HTTP API: four
//! verbs over JSON, no interpretation. Status handling (retry, rollback,
//! cache fallback) belongs to the services built on top, so a gateway only
//! fails for transport-level reasons — it returns non-2xx statuses as plain
//! [`GatewayResponse`] values.
//!
//! # Implementing a Custom Gateway
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use foyer_sync::error::SyncError;
//! use foyer_sync::gateway::{Gateway, GatewayResponse};
//!
//! struct MyGateway { /* ... */ }
//!
//! #[async_trait]
//! impl Gateway for MyGateway {
//!     async fn get(&self, path: &str) -> Result<GatewayResponse, SyncError> {
//!         todo!()
//!     }
//!
//!     async fn post(
//!         &self,
//!         path: &str,
//!         body: Option<serde_json::Value>,
//!     ) -> Result<GatewayResponse, SyncError> {
//!         todo!()
//!     }
//!
//!     async fn put(
//!         &self,
//!         path: &str,
//!         body: serde_json::Value,
//!     ) -> Result<GatewayResponse, SyncError> {
//!         todo!()
//!     }
//!
//!     async fn delete(&self, path: &str) -> Result<GatewayResponse, SyncError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::{Result, SyncError};
use crate::protocol::ApiErrorBody;

/// Status code and raw body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: String,
}

impl GatewayResponse {
    /// Build a response from parts.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `true` for 304 Not Modified.
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    /// `true` for 5xx statuses.
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Serialization`] if the body is not valid JSON of
    /// the expected shape.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Convert a non-success response into a [`SyncError::Rejected`],
    /// extracting the server's `{"error": "..."}` message when present.
    pub fn rejection(&self) -> SyncError {
        let message = self
            .json::<ApiErrorBody>()
            .map(|body| body.error)
            .unwrap_or_else(|_| format!("request failed with status {}", self.status));
        SyncError::Rejected {
            status: self.status,
            message,
        }
    }
}

/// A JSON-over-HTTP channel to the Foyer API.
///
/// # Object Safety
///
/// The trait is object-safe; the engine holds gateways as
/// `Arc<dyn Gateway>` so tests can substitute scripted implementations.
///
/// # Errors
///
/// Implementations distinguish three transport-level failures the engine
/// treats differently: [`SyncError::Offline`] (no connectivity, don't retry),
/// [`SyncError::Timeout`] (soft failure, no retry budget consumed), and
/// [`SyncError::TransportReceive`]/[`SyncError::TransportSend`] (counted
/// against the retry budget).
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// Fetch a resource.
    async fn get(&self, path: &str) -> Result<GatewayResponse>;

    /// Create a resource, or invoke a verb-style endpoint when `body` is `None`.
    async fn post(&self, path: &str, body: Option<serde_json::Value>) -> Result<GatewayResponse>;

    /// Replace a resource.
    async fn put(&self, path: &str, body: serde_json::Value) -> Result<GatewayResponse>;

    /// Delete a resource.
    async fn delete(&self, path: &str) -> Result<GatewayResponse>;
}
