//! Auth errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("User not found")]
    UserNotFound,

    #[error("Identity verification failed: {0}")]
    Verification(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
