//! Model validation errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Record id must not be empty")]
    EmptyRecordId,

    #[error("Invalid task time: {0} (expected HH:MM)")]
    InvalidTaskTime(String),

    #[error("Invalid day cut hour: {0} (expected 0-23)")]
    InvalidDayCutHour(u8),
}
