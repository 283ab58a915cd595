//! Client Sync Engine
//!
//! The client-side half of the sync core: owns the local replica, tracks
//! pending writes, pushes and pulls on triggers (debounced edits, a periodic
//! tick, connectivity and foreground signals), merges server deltas, and
//! fans out events to UI collaborators.

pub mod engine;
pub mod error;
pub mod events;
pub mod import;
pub mod merge;
pub mod records;
pub mod storage;
pub mod transport;

pub use engine::{
    BlockPatch, EngineConfig, EngineStatus, SettingsPatch, SyncEngine, TaskPatch,
};
pub use error::EngineError;
pub use events::{EngineEvent, SubscriptionId};
pub use records::{LocalRecord, LocalSettings};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use transport::{HttpTransport, SignIn, SyncTransport, TransportError};
