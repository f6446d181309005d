//! HTTP gateway implementation using `reqwest`.
//!
//! Only available when the `gateway-http` feature is enabled (it is enabled
//! by default). The client carries the session cookie jar reqwest manages by
//! default, which is how the Foyer API tracks authentication.

use async_trait::async_trait;
use reqwest::{Client, Method};

use crate::error::{Result, SyncError};
use crate::gateway::{Gateway, GatewayResponse};

/// A [`Gateway`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    /// Create a gateway for the given API base URL.
    ///
    /// The per-request timeout is left to the engine (which wraps every call
    /// in its own deadline), so the underlying client is built without one.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSend`] if the TLS backend fails to
    /// initialize.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| SyncError::TransportSend(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Create a gateway from an existing client, for callers that need
    /// custom TLS, proxies, or default headers.
    pub fn from_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<GatewayResponse> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(GatewayResponse { status, body })
    }
}

/// Map a reqwest error onto the engine's transport taxonomy.
fn map_reqwest_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_connect() {
        SyncError::Offline
    } else if err.is_request() || err.is_body() {
        SyncError::TransportSend(err.to_string())
    } else {
        SyncError::TransportReceive(err.to_string())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn get(&self, path: &str) -> Result<GatewayResponse> {
        self.execute(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Option<serde_json::Value>) -> Result<GatewayResponse> {
        self.execute(Method::POST, path, body).await
    }

    async fn put(&self, path: &str, body: serde_json::Value) -> Result<GatewayResponse> {
        self.execute(Method::PUT, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<GatewayResponse> {
        self.execute(Method::DELETE, path, None).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn url_joining_normalizes_slashes() {
        let gateway = HttpGateway::new("https://api.foyer.club/").unwrap();
        assert_eq!(gateway.url("/session"), "https://api.foyer.club/session");
        assert_eq!(gateway.url("session"), "https://api.foyer.club/session");
    }

    #[test]
    fn gateway_is_send_and_clone() {
        fn assert_traits<T: Send + Sync + Clone>() {}
        assert_traits::<HttpGateway>();
    }

    #[tokio::test]
    async fn connect_failure_maps_to_offline() {
        let gateway = HttpGateway::new("http://127.0.0.1:1").unwrap();
        let err = gateway.get("/session").await.unwrap_err();
        assert!(
            matches!(err, SyncError::Offline | SyncError::TransportReceive(_)),
            "expected a transport-level error, got {err:?}"
        );
    }
}
