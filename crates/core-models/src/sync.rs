//! Sync wire protocol
//!
//! Push/pull payloads exchanged between the client engine and the server,
//! plus the client-side sync bookkeeping and the write-conflict gate both
//! peers agree on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Block, BlockChange, Settings, TomorrowTask, TomorrowTaskChange};

/// Which collection a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    #[serde(rename = "block")]
    Block,
    #[serde(rename = "tomorrowTask")]
    TomorrowTask,
}

/// Client push request: one batch across all entity classes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    /// Installation identifier of the pushing client
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<BlockChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tomorrow_tasks: Option<Vec<TomorrowTaskChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

impl PushPayload {
    pub fn is_empty(&self) -> bool {
        self.blocks.as_ref().map_or(true, Vec::is_empty)
            && self.tomorrow_tasks.as_ref().map_or(true, Vec::is_empty)
            && self.settings.is_none()
    }
}

/// Record ids accepted by a push, per collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Applied {
    pub blocks: Vec<String>,
    pub tomorrow_tasks: Vec<String>,
    pub settings: bool,
}

/// A write-write conflict detected during push.
///
/// `id` is the record the client tried to update; the server kept its own
/// copy and appended a `{id}-conflict-{ms}` duplicate carrying the
/// rejected text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub id: String,
    pub local_version: i64,
    pub server_version: i64,
}

/// Server response to a push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub success: bool,
    pub applied: Applied,
    #[serde(default)]
    pub conflicts: Vec<ConflictReport>,
}

/// A persisted conflict row, returned on pull until resolved.
///
/// Carries the id `resolve-conflict` expects; the data merge itself already
/// happened at push time via the keep-both duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub id: uuid::Uuid,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    /// Id of the record the rejected write targeted
    pub record_id: String,
    /// Id of the appended keep-both duplicate
    pub conflict_record_id: String,
    pub local_version: i64,
    pub server_version: i64,
    pub created_at: DateTime<Utc>,
}

/// How a user chose to settle a conflict. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    KeptLocal,
    KeptServer,
    KeptBoth,
}

/// Server response to an incremental pull or a full fetch.
///
/// Incremental pulls include tombstones so deletions propagate; `synced_at`
/// is the server's clock and becomes the client's next `since` cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub blocks: Vec<Block>,
    pub tomorrow_tasks: Vec<TomorrowTask>,
    pub settings: Option<Settings>,
    #[serde(default)]
    pub conflicts: Vec<SyncConflict>,
    pub synced_at: DateTime<Utc>,
}

/// Local lifecycle tag for a replicated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Has a local change the server has not accepted yet
    Pending,
    /// Matches the server's copy
    Synced,
    /// The server holds a newer version than the one this edit was based on
    Conflict,
}

/// Client-side sync bookkeeping, persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Server timestamp of the last successful pull; next `since` cursor
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Reserved for a future opaque cursor
    pub server_cursor: Option<String>,
    /// Stable per-installation identifier
    pub client_id: String,
}

impl SyncState {
    pub fn new(client_id: String) -> Self {
        Self {
            last_synced_at: None,
            server_cursor: None,
            client_id,
        }
    }
}

/// The write-conflict gate.
///
/// A push is a conflict iff the server already has a version at or above
/// the one the client based its edit on, and that version came from a
/// different replica. A record without a client id is treated as written
/// by an unknown client, which never matches.
pub fn is_write_conflict(
    existing_version: i64,
    existing_client: Option<&str>,
    incoming_version: i64,
    incoming_client: Option<&str>,
) -> bool {
    if existing_version < incoming_version {
        return false;
    }
    match (existing_client, incoming_client) {
        (Some(theirs), Some(ours)) => theirs != ours,
        _ => true,
    }
}

/// Id of the keep-both duplicate appended when a push conflicts.
pub fn conflict_record_id(incoming_id: &str, at: DateTime<Utc>) -> String {
    format!("{}-conflict-{}", incoming_id, at.timestamp_millis())
}

/// Text carried by the keep-both duplicate.
pub fn conflict_text(incoming_text: &str) -> String {
    format!("[Conflict] {}", incoming_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_incoming_version_is_not_a_conflict() {
        assert!(!is_write_conflict(2, Some("a"), 3, Some("b")));
    }

    #[test]
    fn same_client_is_never_a_conflict() {
        assert!(!is_write_conflict(4, Some("a"), 3, Some("a")));
    }

    #[test]
    fn stale_version_from_other_client_conflicts() {
        assert!(is_write_conflict(4, Some("a"), 3, Some("b")));
        assert!(is_write_conflict(3, Some("a"), 3, Some("b")));
    }

    #[test]
    fn unknown_writer_counts_as_different_client() {
        assert!(is_write_conflict(3, None, 3, Some("b")));
        assert!(is_write_conflict(3, Some("a"), 3, None));
        assert!(is_write_conflict(3, None, 2, None));
    }
}
