//! Diff engine - comparison policy and tree synchronization

mod compare;
mod engine;

pub use compare::{ComparePolicy, DEFAULT_TIME_TOLERANCE_SECS};
pub use engine::{Direction, SyncEngine, SyncOptions};
