//! Settings persistence
//!
//! One row per user, no version counter. Push upserts unconditionally;
//! last write wins.

use chrono::{DateTime, Utc};
use core_models::{Settings, Theme};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::Tx;

pub async fn upsert(
    tx: &mut Tx<'_>,
    user_id: Uuid,
    settings: &Settings,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO settings (user_id, theme, day_cut_hour, updated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id) DO UPDATE
        SET theme = $2, day_cut_hour = $3, updated_at = $4
        "#,
    )
    .bind(user_id)
    .bind(theme_str(settings.theme))
    .bind(settings.day_cut_hour as i16)
    .bind(settings.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Settings row changed after `since`, if any.
pub async fn changed_since(
    pool: &PgPool,
    user_id: Uuid,
    since: Option<DateTime<Utc>>,
) -> Result<Option<Settings>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT theme, day_cut_hour, updated_at
        FROM settings
        WHERE user_id = $1 AND ($2::timestamptz IS NULL OR updated_at > $2)
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_optional(pool)
    .await?;

    row.map(|r| settings_from_row(&r)).transpose()
}

pub async fn get(pool: &PgPool, user_id: Uuid) -> Result<Option<Settings>, sqlx::Error> {
    changed_since(pool, user_id, None).await
}

fn settings_from_row(row: &sqlx::postgres::PgRow) -> Result<Settings, sqlx::Error> {
    let theme: String = row.try_get("theme")?;
    let day_cut_hour: i16 = row.try_get("day_cut_hour")?;
    Ok(Settings {
        theme: parse_theme(&theme),
        day_cut_hour: day_cut_hour as u8,
        updated_at: row.try_get("updated_at")?,
    })
}

fn theme_str(theme: Theme) -> &'static str {
    match theme {
        Theme::System => "system",
        Theme::Light => "light",
        Theme::Dark => "dark",
    }
}

fn parse_theme(s: &str) -> Theme {
    match s {
        "light" => Theme::Light,
        "dark" => Theme::Dark,
        _ => Theme::System,
    }
}
