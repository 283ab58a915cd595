//! Auth routes

use axum::{
    extract::{Json, State},
    http::HeaderMap,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use core_auth::{auth_middleware, ExtractAuth};
use core_models::{UserInfo, VerifiedIdentity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .route("/me", get(me))
        .layer(axum_middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/google", post(google))
        .route("/internal", post(internal))
        .merge(protected)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleSignIn {
    pub id_token: String,
    /// Accepted for forward compatibility; the server does not refresh
    #[serde(default)]
    #[allow(dead_code)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub token: String,
    pub user: UserInfo,
}

/// Exchange a Google id token for a bearer token.
async fn google(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GoogleSignIn>,
) -> Result<Json<SignInResponse>, ApiError> {
    let identity = state.verifier.verify(&req.id_token).await?;
    sign_in(&state, identity).await
}

/// Trusted-source sign-in: same payload minus verification.
///
/// Only usable when INTERNAL_AUTH_KEY is configured and the caller presents
/// it in the x-internal-auth header.
async fn internal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(identity): Json<VerifiedIdentity>,
) -> Result<Json<SignInResponse>, ApiError> {
    let Some(expected) = &state.config.internal_auth_key else {
        return Err(ApiError::Forbidden);
    };
    let presented = headers
        .get("x-internal-auth")
        .and_then(|v| v.to_str().ok());
    if presented != Some(expected.as_str()) {
        return Err(ApiError::Forbidden);
    }

    sign_in(&state, identity).await
}

async fn sign_in(
    state: &AppState,
    identity: VerifiedIdentity,
) -> Result<Json<SignInResponse>, ApiError> {
    if identity.provider_id.is_empty() {
        return Err(ApiError::BadRequest("providerId must not be empty".into()));
    }

    let user = state.auth.users.upsert_by_provider(&identity).await?;
    let token = state.auth.tokens.issue(user.id)?;
    tracing::debug!(user_id = %user.id, "issued bearer token");

    Ok(Json(SignInResponse {
        token,
        user: user.into(),
    }))
}

/// The bearer's own user record; clients call this to validate a persisted
/// token.
async fn me(ExtractAuth(auth): ExtractAuth) -> Json<UserInfo> {
    Json(auth.user.into())
}
