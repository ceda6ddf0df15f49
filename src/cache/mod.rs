//! Shared event cache
//!
//! The cache is the hand-off point between rule evaluators (which write
//! events) and this engine (which reads, stamps and removes them). It is
//! shared process-wide without cross-entity locks; isolation comes from the
//! key layout alone:
//!
//! ```text
//! w8t:{tenant}:faultCenter:{id}.events   hash  fingerprint → AlertEvent
//! w8t:{tenant}:faultCenter:{id}.mutes    hash  silence id  → SilenceRule
//! w8t:{tenant}:faultCenter:{id}.info     value FaultCenter
//! w8t:{tenant}:probing:{ruleId}.event    value ProbingEvent
//! ```
//!
//! External readers depend on these keys, so they must not change.
//!
//! Values are stored as JSON. A backend only has to provide raw hash/value
//! access ([`CacheBackend`]); the typed operations live on [`Cache`].

pub mod memory;
#[cfg(feature = "redis-cache")]
pub mod redis;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::models::{AlertEvent, FaultCenter, ProbingEvent, SilenceRule};

pub use memory::MemoryBackend;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend could not be reached or rejected the command
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache value could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(feature = "redis-cache")]
impl From<::redis::RedisError> for CacheError {
    fn from(err: ::redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

pub fn events_key(tenant_id: &str, fault_center_id: &str) -> String {
    format!("w8t:{tenant_id}:faultCenter:{fault_center_id}.events")
}

pub fn mutes_key(tenant_id: &str, fault_center_id: &str) -> String {
    format!("w8t:{tenant_id}:faultCenter:{fault_center_id}.mutes")
}

pub fn info_key(tenant_id: &str, fault_center_id: &str) -> String {
    format!("w8t:{tenant_id}:faultCenter:{fault_center_id}.info")
}

pub fn probing_key(tenant_id: &str, rule_id: &str) -> String {
    format!("w8t:{tenant_id}:probing:{rule_id}.event")
}

/// Raw key/value access to the shared store
///
/// Mirrors the subset of Redis used by the engine: hashes for event and
/// silence sets, plain values for single documents.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<String>>;

    async fn hash_set(&self, key: &str, field: &str, value: String) -> CacheResult<()>;

    async fn hash_delete(&self, key: &str, field: &str) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;
}

/// Typed access to events, silences, fault center snapshots and probing
/// events
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Cache backed by process memory
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    // ========================================================================
    // Alert events
    // ========================================================================

    /// All events of one fault center
    ///
    /// Entries that fail to decode are dropped with a warning; they are never
    /// repaired or retried.
    pub async fn list_events(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
    ) -> CacheResult<Vec<AlertEvent>> {
        let raw = self
            .backend
            .hash_get_all(&events_key(tenant_id, fault_center_id))
            .await?;

        Ok(decode_all(raw))
    }

    pub async fn get_event(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
        fingerprint: &str,
    ) -> CacheResult<Option<AlertEvent>> {
        let raw = self
            .backend
            .hash_get(&events_key(tenant_id, fault_center_id), fingerprint)
            .await?;

        Ok(raw.and_then(|value| decode(fingerprint, &value)))
    }

    pub async fn push_event(&self, event: &AlertEvent) -> CacheResult<()> {
        let value = serde_json::to_string(event)?;
        self.backend
            .hash_set(
                &events_key(&event.tenant_id, &event.fault_center_id),
                &event.fingerprint,
                value,
            )
            .await
    }

    pub async fn remove_event(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
        fingerprint: &str,
    ) -> CacheResult<()> {
        self.backend
            .hash_delete(&events_key(tenant_id, fault_center_id), fingerprint)
            .await
    }

    // ========================================================================
    // Silences
    // ========================================================================

    pub async fn list_silences(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
    ) -> CacheResult<Vec<SilenceRule>> {
        let raw = self
            .backend
            .hash_get_all(&mutes_key(tenant_id, fault_center_id))
            .await?;

        Ok(decode_all(raw))
    }

    pub async fn push_silence(&self, rule: &SilenceRule) -> CacheResult<()> {
        let value = serde_json::to_string(rule)?;
        self.backend
            .hash_set(
                &mutes_key(&rule.tenant_id, &rule.fault_center_id),
                &rule.id,
                value,
            )
            .await
    }

    pub async fn remove_silence(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
        id: &str,
    ) -> CacheResult<()> {
        self.backend
            .hash_delete(&mutes_key(tenant_id, fault_center_id), id)
            .await
    }

    // ========================================================================
    // Fault center snapshots
    // ========================================================================

    pub async fn get_fault_center(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
    ) -> CacheResult<Option<FaultCenter>> {
        let key = info_key(tenant_id, fault_center_id);
        let raw = self.backend.get(&key).await?;
        Ok(raw.and_then(|value| decode(&key, &value)))
    }

    pub async fn push_fault_center(&self, center: &FaultCenter) -> CacheResult<()> {
        let value = serde_json::to_string(center)?;
        self.backend
            .set(&info_key(&center.tenant_id, &center.id), value)
            .await
    }

    pub async fn remove_fault_center(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
    ) -> CacheResult<()> {
        self.backend
            .delete(&info_key(tenant_id, fault_center_id))
            .await
    }

    // ========================================================================
    // Probing events
    // ========================================================================

    pub async fn get_probing_event(
        &self,
        tenant_id: &str,
        rule_id: &str,
    ) -> CacheResult<Option<ProbingEvent>> {
        let key = probing_key(tenant_id, rule_id);
        let raw = self.backend.get(&key).await?;
        Ok(raw.and_then(|value| decode(&key, &value)))
    }

    pub async fn push_probing_event(&self, event: &ProbingEvent) -> CacheResult<()> {
        let value = serde_json::to_string(event)?;
        self.backend
            .set(
                &probing_key(&event.event.tenant_id, &event.event.rule_id),
                value,
            )
            .await
    }

    pub async fn remove_probing_event(&self, tenant_id: &str, rule_id: &str) -> CacheResult<()> {
        self.backend.delete(&probing_key(tenant_id, rule_id)).await
    }
}

fn decode<T: DeserializeOwned>(name: &str, value: &str) -> Option<T> {
    match serde_json::from_str(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!("dropping malformed cache entry {name}: {e}");
            None
        }
    }
}

fn decode_all<T: DeserializeOwned>(raw: HashMap<String, String>) -> Vec<T> {
    raw.iter()
        .filter_map(|(field, value)| decode(field, value))
        .collect()
}
