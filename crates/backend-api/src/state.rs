//! Application state

use std::sync::Arc;

use core_auth::{AuthService, GoogleVerifier, IdentityVerifier, TokenService, UserService};
use sqlx::PgPool;

use crate::config::Config;

pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub auth: Arc<AuthService>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let tokens = TokenService::new(&config.jwt_secret);
        let users = UserService::new(pool.clone());
        let verifier = Arc::new(GoogleVerifier::new(config.google_client_id.clone()));
        Self {
            auth: Arc::new(AuthService::new(tokens, users)),
            verifier,
            config,
            pool,
        }
    }

    /// Swap the id-token verifier (tests use a stub).
    pub fn with_verifier(mut self, verifier: Arc<dyn IdentityVerifier>) -> Self {
        self.verifier = verifier;
        self
    }
}
