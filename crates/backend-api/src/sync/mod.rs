//! Server-side sync logic

pub mod plan;

pub use plan::{plan_write, ExistingRecord, WritePlan};
