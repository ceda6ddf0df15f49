//! Error types of the alerting core

use crate::cache::CacheError;
use crate::probing::prober::ProbeError;
use crate::senders::SendError;
use crate::store::StorageError;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the supervisors and dispatchers
///
/// Collaborator errors abort the current tick or probe and are retried on the
/// next cycle; none of them are fatal to a supervisor.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("send failed: {0}")]
    Send(#[from] SendError),

    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Several concurrent children failed; siblings still ran to completion
    #[error("{} dispatch error(s): {}", .0.len(), .0.join("; "))]
    Dispatch(Vec<String>),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }
}
