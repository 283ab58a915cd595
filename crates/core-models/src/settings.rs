//! User settings - scalar preferences, one row per user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Color theme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    System,
    Light,
    Dark,
}

impl Default for Theme {
    fn default() -> Self {
        Self::System
    }
}

/// Per-user preferences. No version counter; last writer wins by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme: Theme,
    /// Hour of day at which "tomorrow" becomes "today", 0-23
    pub day_cut_hour: u8,
    pub updated_at: DateTime<Utc>,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.day_cut_hour > 23 {
            return Err(ModelError::InvalidDayCutHour(self.day_cut_hour));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            day_cut_hour: 4,
            updated_at: Utc::now(),
        }
    }
}
