//! Persistent collaborators of the engine
//!
//! ## Backends
//!
//! - **In-Memory**: configuration seeded from the config file, bounded history
//! - **SQLite** (`storage-sqlite`, default): durable history and notice ledger

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{ConfigStore, HealthStatus, HistoryBackend};
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryHistory, MemoryStore};
pub use schema::{HistoryEventRow, NoticeOutcome, NoticeRecord, ProbingHistoryRow};
