//! Write planning for pushed records
//!
//! Decides, from row metadata alone, what a pushed change does to the
//! store. Handlers execute the plan inside the batch transaction; keeping
//! the decision pure lets the conflict invariants be tested without a
//! database.

use chrono::{DateTime, Utc};
use core_models::is_write_conflict;
use uuid::Uuid;

/// Metadata of the row currently in the store, if any.
#[derive(Debug, Clone)]
pub struct ExistingRecord {
    pub user_id: Uuid,
    pub version: i64,
    pub client_id: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// What to do with one incoming record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePlan {
    /// No row with this id yet; insert at the post-accept version
    Insert { version: i64 },
    /// Overwrite the existing row's fields at the post-accept version
    Update { version: i64 },
    /// Keep the existing row untouched and append a keep-both duplicate
    Conflict { server_version: i64 },
    /// The id belongs to another user; drop silently
    SkipForeign,
}

/// Plan one write.
///
/// Accepted writes land at `incoming.version + 1`, whether they update an
/// existing row or insert a new one (a fresh v1 push is stored as v2). A
/// tombstoned row is never revived: a live change against it goes down the
/// conflict path regardless of version.
pub fn plan_write(
    user_id: Uuid,
    existing: Option<&ExistingRecord>,
    incoming_version: i64,
    incoming_client: Option<&str>,
    incoming_deleted: bool,
) -> WritePlan {
    let Some(existing) = existing else {
        return WritePlan::Insert {
            version: incoming_version + 1,
        };
    };

    if existing.user_id != user_id {
        return WritePlan::SkipForeign;
    }

    let conflicted = is_write_conflict(
        existing.version,
        existing.client_id.as_deref(),
        incoming_version,
        incoming_client,
    );
    let revives_tombstone = existing.deleted_at.is_some() && !incoming_deleted;

    if conflicted || revives_tombstone {
        WritePlan::Conflict {
            server_version: existing.version,
        }
    } else {
        WritePlan::Update {
            version: incoming_version + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing(user_id: Uuid, version: i64, client_id: &str) -> ExistingRecord {
        ExistingRecord {
            user_id,
            version,
            client_id: Some(client_id.to_string()),
            deleted_at: None,
        }
    }

    #[test]
    fn fresh_insert_lands_one_above_pushed_version() {
        let plan = plan_write(Uuid::new_v4(), None, 1, Some("c1"), false);
        assert_eq!(plan, WritePlan::Insert { version: 2 });
    }

    #[test]
    fn newer_version_from_other_client_is_accepted() {
        let user = Uuid::new_v4();
        let row = existing(user, 2, "a");
        let plan = plan_write(user, Some(&row), 3, Some("b"), false);
        assert_eq!(plan, WritePlan::Update { version: 4 });
    }

    #[test]
    fn same_client_overwrites_even_at_equal_version() {
        let user = Uuid::new_v4();
        let row = existing(user, 3, "a");
        let plan = plan_write(user, Some(&row), 3, Some("a"), false);
        assert_eq!(plan, WritePlan::Update { version: 4 });
    }

    #[test]
    fn stale_write_from_other_client_conflicts() {
        // The two-client race: server at v4 from A, B pushes its v3 edit
        let user = Uuid::new_v4();
        let row = existing(user, 4, "A");
        let plan = plan_write(user, Some(&row), 3, Some("B"), false);
        assert_eq!(plan, WritePlan::Conflict { server_version: 4 });
    }

    #[test]
    fn legacy_row_without_client_id_conflicts_on_stale_write() {
        let user = Uuid::new_v4();
        let row = ExistingRecord {
            user_id: user,
            version: 3,
            client_id: None,
            deleted_at: None,
        };
        let plan = plan_write(user, Some(&row), 3, Some("b"), false);
        assert_eq!(plan, WritePlan::Conflict { server_version: 3 });
    }

    #[test]
    fn foreign_row_is_skipped_silently() {
        let row = existing(Uuid::new_v4(), 1, "a");
        let plan = plan_write(Uuid::new_v4(), Some(&row), 5, Some("b"), false);
        assert_eq!(plan, WritePlan::SkipForeign);
    }

    #[test]
    fn tombstone_is_never_revived() {
        let user = Uuid::new_v4();
        let row = ExistingRecord {
            user_id: user,
            version: 2,
            client_id: Some("a".to_string()),
            deleted_at: Some(Utc::now()),
        };
        // Same client, higher version: would undelete, so it conflicts
        let plan = plan_write(user, Some(&row), 5, Some("a"), false);
        assert_eq!(plan, WritePlan::Conflict { server_version: 2 });
        // A repeated delete from the same client is still an accepted write
        let plan = plan_write(user, Some(&row), 5, Some("a"), true);
        assert_eq!(plan, WritePlan::Update { version: 6 });
    }
}
