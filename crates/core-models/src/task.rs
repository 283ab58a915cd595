//! Tomorrow task model - the user's next-day queue

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// An item in the user's next-day queue. Carries the same sync envelope as
/// a block; rolling tasks into blocks at day boundary is the UI's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TomorrowTask {
    pub id: String,
    pub text: String,
    /// Optional `HH:MM` time of day
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub position: i32,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl TomorrowTask {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Incoming change for a tomorrow task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TomorrowTaskChange {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub position: i32,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl From<TomorrowTask> for TomorrowTaskChange {
    fn from(t: TomorrowTask) -> Self {
        Self {
            id: t.id,
            text: t.text,
            time: t.time,
            position: t.position,
            version: t.version,
            updated_at: t.updated_at,
            deleted_at: t.deleted_at,
            client_id: t.client_id,
        }
    }
}

/// Presentation order for tasks: `(position ASC)`.
pub fn task_order(a: &TomorrowTask, b: &TomorrowTask) -> Ordering {
    a.position.cmp(&b.position)
}

/// Validate an optional `HH:MM` task time.
pub fn validate_task_time(time: Option<&str>) -> Result<(), ModelError> {
    let Some(time) = time else { return Ok(()) };
    let valid = time.len() == 5
        && time.as_bytes()[2] == b':'
        && time[..2].parse::<u8>().map_or(false, |h| h < 24)
        && time[3..].parse::<u8>().map_or(false, |m| m < 60);
    if valid {
        Ok(())
    } else {
        Err(ModelError::InvalidTaskTime(time.to_string()))
    }
}
