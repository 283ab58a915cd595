//! Sync routes - push, pull, full, resolve-conflict

use axum::{
    extract::{Json, Query, State},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use core_auth::{auth_middleware, ExtractAuth};
use core_models::{
    validate_task_time, Applied, ConflictResolution, PullResponse, PushPayload, PushResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{self, ApplyOutcome};

pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/push", post(push))
        .route("/pull", get(pull))
        .route("/full", get(full))
        .route("/resolve-conflict", post(resolve_conflict))
        .layer(axum_middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ))
}

/// Apply a batched push atomically.
///
/// The whole batch commits in one transaction so a partial push never
/// leaves the store torn. The version/clientId gate decides each record;
/// conflicting writes become keep-both duplicates, never overwrites.
async fn push(
    State(state): State<Arc<AppState>>,
    ExtractAuth(auth): ExtractAuth,
    Json(payload): Json<PushPayload>,
) -> Result<Json<PushResponse>, ApiError> {
    validate_push(&payload)?;

    let user_id = auth.user_id();
    let now = Utc::now();
    let mut applied = Applied::default();
    let mut conflicts = Vec::new();

    let mut tx = state.pool.begin().await?;

    for change in payload.blocks.iter().flatten() {
        match store::blocks::apply_change(&mut tx, user_id, change, now).await? {
            ApplyOutcome::Applied => applied.blocks.push(change.id.clone()),
            ApplyOutcome::Conflicted {
                report,
                conflict_record_id,
            } => {
                store::conflicts::insert(&mut tx, user_id, &report, &conflict_record_id, now)
                    .await?;
                conflicts.push(report);
            }
            ApplyOutcome::Skipped => {}
        }
    }

    for change in payload.tomorrow_tasks.iter().flatten() {
        match store::tasks::apply_change(&mut tx, user_id, change, now).await? {
            ApplyOutcome::Applied => applied.tomorrow_tasks.push(change.id.clone()),
            ApplyOutcome::Conflicted {
                report,
                conflict_record_id,
            } => {
                store::conflicts::insert(&mut tx, user_id, &report, &conflict_record_id, now)
                    .await?;
                conflicts.push(report);
            }
            ApplyOutcome::Skipped => {}
        }
    }

    if let Some(settings) = &payload.settings {
        store::settings::upsert(&mut tx, user_id, settings).await?;
        applied.settings = true;
    }

    tx.commit().await?;

    tracing::debug!(
        user_id = %user_id,
        blocks = applied.blocks.len(),
        tasks = applied.tomorrow_tasks.len(),
        conflicts = conflicts.len(),
        "push applied"
    );

    Ok(Json(PushResponse {
        success: true,
        applied,
        conflicts,
    }))
}

fn validate_push(payload: &PushPayload) -> Result<(), ApiError> {
    if payload.client_id.is_empty() {
        return Err(ApiError::BadRequest("clientId must not be empty".into()));
    }
    for change in payload.blocks.iter().flatten() {
        if change.id.is_empty() {
            return Err(ApiError::BadRequest("block id must not be empty".into()));
        }
    }
    for change in payload.tomorrow_tasks.iter().flatten() {
        if change.id.is_empty() {
            return Err(ApiError::BadRequest("task id must not be empty".into()));
        }
        validate_task_time(change.time.as_deref())?;
    }
    if let Some(settings) = &payload.settings {
        settings.validate()?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct PullParams {
    /// Exclusive `updated_at` watermark; absent means "from epoch"
    pub since: Option<DateTime<Utc>>,
}

/// Incremental delta since the client's cursor, tombstones included.
async fn pull(
    State(state): State<Arc<AppState>>,
    ExtractAuth(auth): ExtractAuth,
    Query(params): Query<PullParams>,
) -> Result<Json<PullResponse>, ApiError> {
    let user_id = auth.user_id();
    // Taken before the queries: re-delivery is harmless, a gap is not
    let synced_at = Utc::now();

    let (blocks, tomorrow_tasks, settings, conflicts) = tokio::try_join!(
        store::blocks::changed_since(&state.pool, user_id, params.since),
        store::tasks::changed_since(&state.pool, user_id, params.since),
        store::settings::changed_since(&state.pool, user_id, params.since),
        store::conflicts::unresolved(&state.pool, user_id),
    )?;

    Ok(Json(PullResponse {
        blocks,
        tomorrow_tasks,
        settings,
        conflicts,
        synced_at,
    }))
}

/// Everything live, no tombstones, no cursor. First sign-in and resets.
async fn full(
    State(state): State<Arc<AppState>>,
    ExtractAuth(auth): ExtractAuth,
) -> Result<Json<PullResponse>, ApiError> {
    let user_id = auth.user_id();
    let synced_at = Utc::now();

    let (blocks, tomorrow_tasks, settings) = tokio::try_join!(
        store::blocks::live(&state.pool, user_id),
        store::tasks::live(&state.pool, user_id),
        store::settings::get(&state.pool, user_id),
    )?;

    Ok(Json(PullResponse {
        blocks,
        tomorrow_tasks,
        settings,
        conflicts: Vec::new(),
        synced_at,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    pub conflict_id: Uuid,
    pub resolution: ConflictResolution,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictResponse {
    pub success: bool,
}

/// Bookkeeping: the data merge already happened at push time.
async fn resolve_conflict(
    State(state): State<Arc<AppState>>,
    ExtractAuth(auth): ExtractAuth,
    Json(req): Json<ResolveConflictRequest>,
) -> Result<Json<ResolveConflictResponse>, ApiError> {
    let found = store::conflicts::resolve(
        &state.pool,
        auth.user_id(),
        req.conflict_id,
        req.resolution,
    )
    .await?;

    if !found {
        return Err(ApiError::NotFound("conflict not found".into()));
    }

    Ok(Json(ResolveConflictResponse { success: true }))
}
