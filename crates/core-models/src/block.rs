//! Block model - one line of the user's log

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single log line as stored and shipped over the wire.
///
/// `created_at` is the authored timestamp and never changes after creation;
/// `updated_at` is server-authoritative once a write is accepted and serves
/// as the incremental pull cursor. A non-null `deleted_at` marks a tombstone
/// that is kept so deletions propagate to other clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Client-chosen opaque identifier, unique per user
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// External calendar handle, opaque to sync (round-tripped unchanged)
    #[serde(default)]
    pub calendar_event_id: Option<String>,
    /// Secondary sort key among blocks sharing a `created_at` second
    #[serde(default)]
    pub position: i32,
    /// Monotone counter, bumped by the writer and again by the server
    pub version: i64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Installation that produced this version
    #[serde(default)]
    pub client_id: Option<String>,
}

impl Block {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Incoming change for a block as pushed by a client.
///
/// Partial on the wire: absent fields take the documented defaults
/// (`position = 0`, `calendar_event_id = None`, `deleted_at = None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockChange {
    pub id: String,
    #[serde(default)]
    pub text: String,
    /// Authored timestamp; the server never mutates it
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub calendar_event_id: Option<String>,
    #[serde(default)]
    pub position: i32,
    /// The version this client is at after its local edits
    pub version: i64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl From<Block> for BlockChange {
    fn from(b: Block) -> Self {
        Self {
            id: b.id,
            text: b.text,
            created_at: b.created_at,
            calendar_event_id: b.calendar_event_id,
            position: b.position,
            version: b.version,
            updated_at: b.updated_at,
            deleted_at: b.deleted_at,
            client_id: b.client_id,
        }
    }
}

/// Presentation order for blocks: `(created_at ASC, position ASC)`.
pub fn block_order(a: &Block, b: &Block) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then(a.position.cmp(&b.position))
}
