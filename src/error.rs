//! Error types for the Foyer sync engine.

use thiserror::Error;

/// Errors that can occur inside the Foyer sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Failed to send a message through the push transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the push transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The push transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// The client is offline; no network call was attempted.
    #[error("client is offline")]
    Offline,

    /// A network call exceeded the configured request timeout.
    #[error("request timed out")]
    Timeout,

    /// Failed to serialize or deserialize a wire payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The server rejected a request with a non-success status.
    #[error("server rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code of the rejection.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// A privileged operation was attempted before session resolution completed.
    #[error("session has not been resolved yet")]
    SessionUnresolved,

    /// The current role is not allowed to perform the operation.
    #[error("operation not permitted for the current role")]
    NotPermitted,

    /// Attempted an operation that requires an active push connection.
    #[error("push channel not connected")]
    NotConnected,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Foyer sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
