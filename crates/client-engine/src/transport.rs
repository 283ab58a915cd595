//! Network transport
//!
//! The engine talks to the server through this trait; tests script it.
//! The HTTP implementation wraps reqwest with a bounded timeout so a hung
//! request can never hold the sync gate forever.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use core_models::{ConflictResolution, PullResponse, PushPayload, PushResponse, UserInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The bearer token was rejected; the engine signs out
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Server returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),
}

/// Result of exchanging an id token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignIn {
    pub token: String,
    pub user: UserInfo,
}

/// Server operations the engine depends on.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn sign_in_google(&self, id_token: &str) -> Result<SignIn, TransportError>;
    async fn me(&self, token: &str) -> Result<UserInfo, TransportError>;
    async fn push(&self, token: &str, payload: &PushPayload)
        -> Result<PushResponse, TransportError>;
    async fn pull(
        &self,
        token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<PullResponse, TransportError>;
    async fn full(&self, token: &str) -> Result<PullResponse, TransportError>;
    async fn resolve_conflict(
        &self,
        token: &str,
        conflict_id: Uuid,
        resolution: ConflictResolution,
    ) -> Result<(), TransportError>;
}

/// HTTP transport against the sync server.
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Network(e.to_string())
    }
}

/// Map a non-success response to a transport error.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(TransportError::Unauthorized);
    }
    let message = response.text().await.unwrap_or_default();
    Err(TransportError::Http {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn sign_in_google(&self, id_token: &str) -> Result<SignIn, TransportError> {
        let response = self
            .http
            .post(self.url("/auth/google"))
            .json(&serde_json::json!({ "idToken": id_token }))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn me(&self, token: &str) -> Result<UserInfo, TransportError> {
        let response = self
            .http
            .get(self.url("/auth/me"))
            .bearer_auth(token)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn push(
        &self,
        token: &str,
        payload: &PushPayload,
    ) -> Result<PushResponse, TransportError> {
        let response = self
            .http
            .post(self.url("/sync/push"))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn pull(
        &self,
        token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<PullResponse, TransportError> {
        let mut request = self.http.get(self.url("/sync/pull")).bearer_auth(token);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Millis, true))]);
        }
        let response = request.send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn full(&self, token: &str) -> Result<PullResponse, TransportError> {
        let response = self
            .http
            .get(self.url("/sync/full"))
            .bearer_auth(token)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn resolve_conflict(
        &self,
        token: &str,
        conflict_id: Uuid,
        resolution: ConflictResolution,
    ) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.url("/sync/resolve-conflict"))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "conflictId": conflict_id,
                "resolution": resolution,
            }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
