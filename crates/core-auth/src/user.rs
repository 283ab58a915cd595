//! User accounts

use chrono::{DateTime, Utc};
use core_models::{User, VerifiedIdentity};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::AuthError;

/// User service backed by the `users` table.
#[derive(Clone)]
pub struct UserService {
    pool: PgPool,
}

impl UserService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a user keyed by the provider's subject id.
    ///
    /// Profile fields follow whatever the provider reports; the account id
    /// is stable across sign-ins.
    pub async fn upsert_by_provider(
        &self,
        identity: &VerifiedIdentity,
    ) -> Result<User, AuthError> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO users (id, provider_id, email, name, image, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (provider_id) DO UPDATE
            SET email = $3, name = $4, image = $5, updated_at = $6
            RETURNING id, provider_id, email, name, image, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&identity.provider_id)
        .bind(&identity.email)
        .bind(&identity.name)
        .bind(&identity.image)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        user_from_row(&row)
    }

    /// Fetch a user by account id.
    pub async fn get(&self, user_id: Uuid) -> Result<User, AuthError> {
        let row = sqlx::query(
            r#"
            SELECT id, provider_id, email, name, image, created_at, updated_at
            FROM users WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::UserNotFound)?;

        user_from_row(&row)
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> Result<User, AuthError> {
    Ok(User {
        id: row.try_get("id")?,
        provider_id: row.try_get("provider_id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        image: row.try_get("image")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}
