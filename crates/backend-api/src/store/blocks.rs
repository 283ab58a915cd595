//! Block persistence

use chrono::{DateTime, Utc};
use core_models::{
    conflict_record_id, conflict_text, Block, BlockChange, ConflictReport, RecordKind,
};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{ApplyOutcome, Tx};
use crate::sync::{plan_write, ExistingRecord, WritePlan};

/// Apply one pushed block change inside the batch transaction.
pub async fn apply_change(
    tx: &mut Tx<'_>,
    user_id: Uuid,
    change: &BlockChange,
    now: DateTime<Utc>,
) -> Result<ApplyOutcome, sqlx::Error> {
    let existing = fetch_existing(tx, &change.id).await?;
    let plan = plan_write(
        user_id,
        existing.as_ref(),
        change.version,
        change.client_id.as_deref(),
        change.deleted_at.is_some(),
    );

    match plan {
        WritePlan::Insert { version } => {
            insert(tx, user_id, change, version, now).await?;
            Ok(ApplyOutcome::Applied)
        }
        WritePlan::Update { version } => {
            update(tx, user_id, change, version, now).await?;
            Ok(ApplyOutcome::Applied)
        }
        WritePlan::Conflict { server_version } => {
            let conflict_id = insert_conflict_copy(tx, user_id, change, now).await?;
            Ok(ApplyOutcome::Conflicted {
                report: ConflictReport {
                    kind: RecordKind::Block,
                    id: change.id.clone(),
                    local_version: change.version,
                    server_version,
                },
                conflict_record_id: conflict_id,
            })
        }
        WritePlan::SkipForeign => {
            tracing::warn!(id = %change.id, "dropping block push for foreign-owned id");
            Ok(ApplyOutcome::Skipped)
        }
    }
}

async fn fetch_existing(
    tx: &mut Tx<'_>,
    id: &str,
) -> Result<Option<ExistingRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT user_id, version, client_id, deleted_at FROM blocks WHERE id = $1 FOR UPDATE"#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|r| {
        Ok(ExistingRecord {
            user_id: r.try_get("user_id")?,
            version: r.try_get("version")?,
            client_id: r.try_get("client_id")?,
            deleted_at: r.try_get("deleted_at")?,
        })
    })
    .transpose()
}

async fn insert(
    tx: &mut Tx<'_>,
    user_id: Uuid,
    change: &BlockChange,
    version: i64,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO blocks (id, user_id, text, created_at, calendar_event_id, position, version, updated_at, deleted_at, client_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(&change.id)
    .bind(user_id)
    .bind(&change.text)
    .bind(change.created_at)
    .bind(&change.calendar_event_id)
    .bind(change.position)
    .bind(version)
    .bind(now)
    .bind(change.deleted_at)
    .bind(&change.client_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

// created_at is never touched on update
async fn update(
    tx: &mut Tx<'_>,
    user_id: Uuid,
    change: &BlockChange,
    version: i64,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE blocks
        SET text = $3, calendar_event_id = $4, position = $5, version = $6,
            updated_at = $7, deleted_at = $8, client_id = $9
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(&change.id)
    .bind(user_id)
    .bind(&change.text)
    .bind(&change.calendar_event_id)
    .bind(change.position)
    .bind(version)
    .bind(now)
    .bind(change.deleted_at)
    .bind(&change.client_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Append the keep-both duplicate for a conflicted push.
async fn insert_conflict_copy(
    tx: &mut Tx<'_>,
    user_id: Uuid,
    change: &BlockChange,
    now: DateTime<Utc>,
) -> Result<String, sqlx::Error> {
    let conflict_id = conflict_record_id(&change.id, now);
    sqlx::query(
        r#"
        INSERT INTO blocks (id, user_id, text, created_at, calendar_event_id, position, version, updated_at, deleted_at, client_id)
        VALUES ($1, $2, $3, $4, $5, $6, 1, $7, NULL, $8)
        "#,
    )
    .bind(&conflict_id)
    .bind(user_id)
    .bind(conflict_text(&change.text))
    .bind(change.created_at)
    .bind(&change.calendar_event_id)
    .bind(change.position + 1)
    .bind(now)
    .bind(&change.client_id)
    .execute(&mut **tx)
    .await?;

    Ok(conflict_id)
}

/// Changed records for an incremental pull, tombstones included.
pub async fn changed_since(
    pool: &PgPool,
    user_id: Uuid,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Block>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, text, created_at, calendar_event_id, position, version, updated_at, deleted_at, client_id
        FROM blocks
        WHERE user_id = $1 AND ($2::timestamptz IS NULL OR updated_at > $2)
        ORDER BY created_at ASC, position ASC
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    rows.iter().map(block_from_row).collect()
}

/// Live records only, for a full fetch.
pub async fn live(pool: &PgPool, user_id: Uuid) -> Result<Vec<Block>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, text, created_at, calendar_event_id, position, version, updated_at, deleted_at, client_id
        FROM blocks
        WHERE user_id = $1 AND deleted_at IS NULL
        ORDER BY created_at ASC, position ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(block_from_row).collect()
}

fn block_from_row(row: &sqlx::postgres::PgRow) -> Result<Block, sqlx::Error> {
    Ok(Block {
        id: row.try_get("id")?,
        text: row.try_get("text")?,
        created_at: row.try_get("created_at")?,
        calendar_event_id: row.try_get("calendar_event_id")?,
        position: row.try_get("position")?,
        version: row.try_get("version")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
        client_id: row.try_get("client_id")?,
    })
}
