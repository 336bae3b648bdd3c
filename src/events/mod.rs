//! Event logging pipeline
//!
//! Typed records from every producer flow through one [`EventLogger`] worker
//! into a [`RecordStore`] (SQLite on a rig, memory in tests). The
//! [`SyncGate`] gives all participants a common start instant.

mod logger;
mod store;
mod sync;
mod types;

pub use logger::{EventLogger, LoggerConfig, LoggerHandle, LoggerReport};
#[cfg(test)]
pub(crate) use logger::memory_logger;
pub use store::{MemoryStore, RecordStore, SessionMetadata, SqliteStore, trailing_level_run};
pub use sync::SyncGate;
pub use types::{EventRecord, RecordKind, StampedRecord};
