//! Persistence layer
//!
//! One module per entity. Push-batch writes go through a caller-owned
//! transaction; read queries run on the pool.

pub mod blocks;
pub mod conflicts;
pub mod settings;
pub mod tasks;

use core_models::ConflictReport;

/// Outcome of applying one pushed record inside the batch transaction.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// The write was accepted; the id goes into `applied`
    Applied,
    /// Keep-both: the duplicate row was inserted, report goes to the client
    Conflicted {
        report: ConflictReport,
        conflict_record_id: String,
    },
    /// Foreign-owned id, dropped silently
    Skipped,
}

type Tx<'a> = sqlx::Transaction<'a, sqlx::Postgres>;
