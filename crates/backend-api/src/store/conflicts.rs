//! Persisted conflict reports
//!
//! Each keep-both duplicate gets a bookkeeping row here. Pull responses
//! return the unresolved ones so clients learn the id that
//! `resolve-conflict` expects.

use chrono::{DateTime, Utc};
use core_models::{ConflictReport, ConflictResolution, RecordKind, SyncConflict};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::Tx;

pub async fn insert(
    tx: &mut Tx<'_>,
    user_id: Uuid,
    report: &ConflictReport,
    conflict_record_id: &str,
    now: DateTime<Utc>,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO sync_conflicts
            (id, user_id, record_kind, record_id, conflict_record_id, local_version, server_version, resolved, resolution, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, NULL, $8)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(kind_str(report.kind))
    .bind(&report.id)
    .bind(conflict_record_id)
    .bind(report.local_version)
    .bind(report.server_version)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

pub async fn unresolved(pool: &PgPool, user_id: Uuid) -> Result<Vec<SyncConflict>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, record_kind, record_id, conflict_record_id, local_version, server_version, created_at
        FROM sync_conflicts
        WHERE user_id = $1 AND resolved = FALSE
        ORDER BY created_at ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let kind: String = row.try_get("record_kind")?;
            Ok(SyncConflict {
                id: row.try_get("id")?,
                kind: parse_kind(&kind),
                record_id: row.try_get("record_id")?,
                conflict_record_id: row.try_get("conflict_record_id")?,
                local_version: row.try_get("local_version")?,
                server_version: row.try_get("server_version")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

/// Mark a conflict resolved. Returns false when no row matched.
pub async fn resolve(
    pool: &PgPool,
    user_id: Uuid,
    conflict_id: Uuid,
    resolution: ConflictResolution,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE sync_conflicts
        SET resolved = TRUE, resolution = $3
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(conflict_id)
    .bind(user_id)
    .bind(resolution_str(resolution))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn kind_str(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Block => "block",
        RecordKind::TomorrowTask => "tomorrowTask",
    }
}

fn parse_kind(s: &str) -> RecordKind {
    match s {
        "tomorrowTask" => RecordKind::TomorrowTask,
        _ => RecordKind::Block,
    }
}

fn resolution_str(resolution: ConflictResolution) -> &'static str {
    match resolution {
        ConflictResolution::KeptLocal => "kept_local",
        ConflictResolution::KeptServer => "kept_server",
        ConflictResolution::KeptBoth => "kept_both",
    }
}
