//! Local replica records

use core_models::{Block, Settings, SyncStatus, TomorrowTask};
use serde::{Deserialize, Serialize};

/// A replicated record plus its local lifecycle tag.
///
/// `server_version` is the last version this client saw the server hold for
/// the record; the merge uses it to tell "server moved past us" apart from
/// "server is echoing our own write".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord<T> {
    pub record: T,
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub server_version: Option<i64>,
}

impl<T> LocalRecord<T> {
    pub fn pending(record: T) -> Self {
        Self {
            record,
            sync_status: SyncStatus::Pending,
            server_version: None,
        }
    }

    pub fn synced(record: T, server_version: i64) -> Self {
        Self {
            record,
            sync_status: SyncStatus::Synced,
            server_version: Some(server_version),
        }
    }

    /// Pending records are queued for the next push.
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    /// True when the local copy carries an edit the server has not accepted
    /// (pending or already flagged as conflicting). The merge must not
    /// overwrite these.
    pub fn has_local_edit(&self) -> bool {
        matches!(
            self.sync_status,
            SyncStatus::Pending | SyncStatus::Conflict
        )
    }
}

/// Settings plus their lifecycle tag; no version counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSettings {
    pub settings: Settings,
    pub sync_status: SyncStatus,
}

/// Access to the shared sync envelope, for the generic merge.
pub trait Replicated {
    fn id(&self) -> &str;
    fn version(&self) -> i64;
}

impl Replicated for Block {
    fn id(&self) -> &str {
        &self.id
    }
    fn version(&self) -> i64 {
        self.version
    }
}

impl Replicated for TomorrowTask {
    fn id(&self) -> &str {
        &self.id
    }
    fn version(&self) -> i64 {
        self.version
    }
}
