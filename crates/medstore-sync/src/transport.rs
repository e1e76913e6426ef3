//! # Sync Transport
//!
//! The wire seam between [`SyncManager`](crate::SyncManager) and the central
//! server. The manager only sees [`SyncTransport`]; production uses
//! [`HttpTransport`], tests substitute scripted transports.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  connect   POST {url}/sync/connect          ConnectRequest → token      │
//! │  pull      GET  {url}/sync/changes?last_sync=<Watermark>  → ChangeSet   │
//! │  push      POST {url}/sync/push             PushRequest  → PushResponse │
//! │                                                                         │
//! │  Status mapping                                                         │
//! │    200          → Ok                                                    │
//! │    401          → SyncError::Unauthorized                               │
//! │    other        → SyncError::Rejected { status, message }               │
//! │    I/O failure  → SyncError::ConnectionFailed / Timeout                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use medstore_core::changes::{ConnectRequest, ConnectResponse, PushRequest, PushResponse};
use medstore_core::{ChangeSet, Watermark};

/// Operations the sync client needs from the central server.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Presents the store identity and obtains a token.
    async fn connect(&self, request: &ConnectRequest) -> SyncResult<ConnectResponse>;

    /// Fetches records changed after `since`.
    async fn pull(&self, token: &str, since: Watermark) -> SyncResult<ChangeSet>;

    /// Sends a batch of local changes.
    async fn push(&self, token: &str, changes: &ChangeSet) -> SyncResult<PushResponse>;
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// [`SyncTransport`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: String,
    timeout_secs: u64,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let base = Url::parse(&config.server.url)?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(HttpTransport {
            client,
            base: base.as_str().trim_end_matches('/').to_string(),
            timeout_secs: config.server.request_timeout_secs,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Maps transport failures, filling in the configured timeout.
    fn send_error(&self, err: reqwest::Error) -> SyncError {
        match SyncError::from(err) {
            SyncError::Timeout(_) => SyncError::Timeout(self.timeout_secs),
            other => other,
        }
    }

    async fn read<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
        let status = response.status();
        if status == StatusCode::OK {
            return response
                .json::<T>()
                .await
                .map_err(|e| SyncError::DeserializationFailed(e.to_string()));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(SyncError::Unauthorized);
        }

        let message = response.text().await.unwrap_or_default();
        Err(SyncError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn connect(&self, request: &ConnectRequest) -> SyncResult<ConnectResponse> {
        debug!(store_id = ?request.store_id, "POST /sync/connect");
        let response = self
            .client
            .post(self.endpoint("/sync/connect"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::read(response).await
    }

    async fn pull(&self, token: &str, since: Watermark) -> SyncResult<ChangeSet> {
        debug!(%since, "GET /sync/changes");
        let response = self
            .client
            .get(self.endpoint("/sync/changes"))
            .query(&[("last_sync", since.to_string())])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::read(response).await
    }

    async fn push(&self, token: &str, changes: &ChangeSet) -> SyncResult<PushResponse> {
        debug!(records = changes.len(), "POST /sync/push");
        let body = PushRequest {
            changes: changes.clone(),
        };
        let response = self
            .client
            .post(self.endpoint("/sync/push"))
            .json(&body)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::read(response).await
    }
}
