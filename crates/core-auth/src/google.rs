//! External id-token verification
//!
//! The OAuth provider is a black box to the sync core: an id token goes in,
//! a canonical identity comes out. The trait keeps the boundary mockable.

use async_trait::async_trait;
use core_models::VerifiedIdentity;
use serde::Deserialize;

use crate::AuthError;

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Verifies an OAuth id token and returns the canonical identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    sub: String,
    aud: Option<String>,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

/// Verifier backed by Google's tokeninfo endpoint.
pub struct GoogleVerifier {
    http: reqwest::Client,
    /// When set, the token's audience must match
    client_id: Option<String>,
}

impl GoogleVerifier {
    pub fn new(client_id: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { http, client_id }
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, AuthError> {
        let response = self
            .http
            .get(TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| AuthError::Verification(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::InvalidToken);
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| AuthError::Verification(e.to_string()))?;

        if let Some(expected) = &self.client_id {
            if info.aud.as_deref() != Some(expected.as_str()) {
                tracing::warn!("id token audience mismatch");
                return Err(AuthError::InvalidToken);
            }
        }

        Ok(VerifiedIdentity {
            provider_id: info.sub,
            email: info.email.unwrap_or_default(),
            name: info.name.unwrap_or_default(),
            image: info.picture,
        })
    }
}
