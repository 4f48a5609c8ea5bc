//! Port definitions
//!
//! Interfaces the sync core depends on but whose implementations live in
//! adapter crates.
//!
//! - [`ITransferEngine`] - the external transfer/mount engine (rclone)
//! - [`IActivitySink`] - where schedulers append activity records

pub mod activity_sink;
pub mod transfer_engine;

pub use activity_sink::IActivitySink;
pub use transfer_engine::{EngineOutcome, FileAction, FileActionKind, ITransferEngine, SyncReport};
