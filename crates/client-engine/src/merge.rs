//! Client-side merge of pulled server records
//!
//! For each server record: unknown ids are inserted as synced; records with
//! a local edit are flagged as conflicting only when the server has moved
//! past the version the edit was based on; clean local copies are replaced.
//! Local-only records are always preserved.

use std::collections::HashMap;

use core_models::{Settings, SyncStatus};

use crate::records::{LocalRecord, LocalSettings, Replicated};

/// What a merge did to one collection.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Any record inserted, replaced, or re-flagged
    pub changed: bool,
    /// Ids newly marked as conflicting
    pub conflicts: Vec<String>,
}

pub fn merge_records<T: Replicated + Clone>(
    local: &mut HashMap<String, LocalRecord<T>>,
    incoming: Vec<T>,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for server in incoming {
        let id = server.id().to_string();
        let server_version = server.version();

        match local.get_mut(&id) {
            None => {
                local.insert(id, LocalRecord::synced(server, server_version));
                outcome.changed = true;
            }
            Some(ours) if ours.has_local_edit() => {
                if server_version > ours.server_version.unwrap_or(0) {
                    // The server moved past the version this edit was based
                    // on; keep the edit, surface the conflict.
                    ours.server_version = Some(server_version);
                    if ours.sync_status != SyncStatus::Conflict {
                        ours.sync_status = SyncStatus::Conflict;
                        outcome.conflicts.push(id);
                        outcome.changed = true;
                    }
                }
                // Otherwise our unsynced edit strictly supersedes; keep it.
            }
            Some(ours) => {
                ours.record = server;
                ours.server_version = Some(server_version);
                ours.sync_status = SyncStatus::Synced;
                outcome.changed = true;
            }
        }
    }

    outcome
}

/// Settings carry no version; last writer wins by timestamp.
pub fn merge_settings(
    local: &mut Option<LocalSettings>,
    incoming: Option<Settings>,
) -> bool {
    let Some(server) = incoming else { return false };

    let take = match local.as_ref() {
        None => true,
        Some(ours) => match ours.sync_status {
            // A pending local write newer than the server's copy survives
            SyncStatus::Pending | SyncStatus::Conflict => {
                server.updated_at > ours.settings.updated_at
            }
            SyncStatus::Synced => true,
        },
    };

    if take {
        *local = Some(LocalSettings {
            settings: server,
            sync_status: SyncStatus::Synced,
        });
    }
    take
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use core_models::{Block, Theme};

    fn block(id: &str, text: &str, version: i64) -> Block {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Block {
            id: id.to_string(),
            text: text.to_string(),
            created_at: at,
            calendar_event_id: None,
            position: 0,
            version,
            updated_at: at,
            deleted_at: None,
            client_id: Some("server".to_string()),
        }
    }

    #[test]
    fn unknown_server_record_is_inserted_as_synced() {
        let mut local = HashMap::new();
        let outcome = merge_records(&mut local, vec![block("b1", "x", 2)]);

        assert!(outcome.changed);
        assert!(outcome.conflicts.is_empty());
        let ours = &local["b1"];
        assert_eq!(ours.sync_status, SyncStatus::Synced);
        assert_eq!(ours.server_version, Some(2));
    }

    #[test]
    fn synced_local_copy_is_replaced() {
        let mut local = HashMap::new();
        local.insert("b1".to_string(), LocalRecord::synced(block("b1", "old", 2), 2));

        let outcome = merge_records(&mut local, vec![block("b1", "new", 4)]);

        assert!(outcome.changed);
        assert_eq!(local["b1"].record.text, "new");
        assert_eq!(local["b1"].server_version, Some(4));
    }

    #[test]
    fn pending_edit_is_flagged_when_server_moved_past_it() {
        let mut local = HashMap::new();
        let mut ours = LocalRecord::synced(block("b1", "mine", 3), 2);
        ours.sync_status = SyncStatus::Pending;
        local.insert("b1".to_string(), ours);

        let outcome = merge_records(&mut local, vec![block("b1", "theirs", 4)]);

        assert_eq!(outcome.conflicts, ["b1"]);
        let ours = &local["b1"];
        assert_eq!(ours.sync_status, SyncStatus::Conflict);
        // The local edit remains visible
        assert_eq!(ours.record.text, "mine");
        assert_eq!(ours.server_version, Some(4));
    }

    #[test]
    fn pending_edit_survives_server_echo_of_known_version() {
        let mut local = HashMap::new();
        let mut ours = LocalRecord::synced(block("b1", "mine", 3), 2);
        ours.sync_status = SyncStatus::Pending;
        local.insert("b1".to_string(), ours);

        // Server still at the version we based the edit on
        let outcome = merge_records(&mut local, vec![block("b1", "base", 2)]);

        assert!(outcome.conflicts.is_empty());
        assert_eq!(local["b1"].sync_status, SyncStatus::Pending);
        assert_eq!(local["b1"].record.text, "mine");
    }

    #[test]
    fn local_only_records_are_preserved() {
        let mut local = HashMap::new();
        local.insert("new".to_string(), LocalRecord::pending(block("new", "draft", 1)));

        merge_records(&mut local, vec![block("b1", "x", 2)]);

        assert!(local.contains_key("new"));
        assert_eq!(local["new"].sync_status, SyncStatus::Pending);
    }

    #[test]
    fn tombstone_replaces_synced_copy() {
        let mut local = HashMap::new();
        local.insert("b1".to_string(), LocalRecord::synced(block("b1", "x", 2), 2));

        let mut dead = block("b1", "x", 3);
        dead.deleted_at = Some(Utc::now());
        let outcome = merge_records(&mut local, vec![dead]);

        assert!(outcome.changed);
        assert!(local["b1"].record.is_deleted());
    }

    #[test]
    fn settings_last_writer_wins() {
        let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let t2 = t1 + Duration::minutes(5);

        // Pending local write newer than the server copy survives
        let mut local = Some(LocalSettings {
            settings: Settings {
                theme: Theme::Dark,
                day_cut_hour: 4,
                updated_at: t2,
            },
            sync_status: SyncStatus::Pending,
        });
        let taken = merge_settings(
            &mut local,
            Some(Settings {
                theme: Theme::Light,
                day_cut_hour: 4,
                updated_at: t1,
            }),
        );
        assert!(!taken);
        assert_eq!(local.as_ref().unwrap().settings.theme, Theme::Dark);

        // A newer server copy wins over a pending older write
        let taken = merge_settings(
            &mut local,
            Some(Settings {
                theme: Theme::Light,
                day_cut_hour: 4,
                updated_at: t2 + Duration::minutes(1),
            }),
        );
        assert!(taken);
        let ours = local.unwrap();
        assert_eq!(ours.settings.theme, Theme::Light);
        assert_eq!(ours.sync_status, SyncStatus::Synced);
    }
}
