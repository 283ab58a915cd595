//! Plain-text import
//!
//! Pre-sync installations kept the log as one plain-text document. Each
//! non-empty line becomes a block; the whole batch is marked pending and
//! goes out in a single push.

use chrono::{DateTime, Utc};
use core_models::Block;
use uuid::Uuid;

pub fn blocks_from_plain_text(
    text: &str,
    client_id: &str,
    now: DateTime<Utc>,
) -> Vec<Block> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| Block {
            id: Uuid::new_v4().to_string(),
            text: line.to_string(),
            created_at: now,
            calendar_event_id: None,
            position: index as i32,
            version: 1,
            updated_at: now,
            deleted_at: None,
            client_id: Some(client_id.to_string()),
        })
        .collect()
}
