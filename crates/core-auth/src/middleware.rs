//! Auth middleware for Axum

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    middleware::Next,
    response::Response,
};
use core_models::User;
use std::sync::Arc;
use uuid::Uuid;

use crate::{token::TokenService, user::UserService, AuthError};

/// Token verification plus account lookup, shared by middleware and routes.
#[derive(Clone)]
pub struct AuthService {
    pub tokens: TokenService,
    pub users: UserService,
}

impl AuthService {
    pub fn new(tokens: TokenService, users: UserService) -> Self {
        Self { tokens, users }
    }

    /// Resolve a bearer token to its user.
    pub async fn authenticate(&self, token: &str) -> Result<User, AuthError> {
        let user_id = self.tokens.verify(token)?;
        self.users.get(user_id).await
    }
}

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
}

impl AuthUser {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }
}

/// Extract the bearer token from the Authorization header.
fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

/// Validate the bearer token and attach the caller to the request.
///
/// Requests without a valid token are rejected here; every route behind
/// this middleware can rely on `ExtractAuth` succeeding.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(request.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let user = auth
        .authenticate(token)
        .await
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(AuthUser { user });
    Ok(next.run(request).await)
}

/// Extractor for the authenticated caller.
#[derive(Debug, Clone)]
pub struct ExtractAuth(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractAuth
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(ExtractAuth)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}
