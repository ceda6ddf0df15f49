//! Persistent store traits
//!
//! Two collaborators sit behind the core:
//!
//! - [`ConfigStore`]: fault centers, notice objects, probing rules,
//!   subscriptions and silences, owned by the (external) management API
//! - [`HistoryBackend`]: append-only archive of recovered events, probe
//!   results and the notification ledger

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{FaultCenter, NoticeObject, ProbingRule, SilenceRule, Subscription};

use super::error::StorageResult;
use super::schema::{HistoryEventRow, NoticeRecord, ProbingHistoryRow};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Configuration consumed by the supervisors
///
/// Lookups are tenant scoped; ids are only unique within a tenant.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list_fault_centers(&self) -> StorageResult<Vec<FaultCenter>>;

    async fn get_fault_center(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> StorageResult<Option<FaultCenter>>;

    async fn upsert_fault_center(&self, center: FaultCenter) -> StorageResult<()>;

    async fn get_notice(&self, tenant_id: &str, id: &str) -> StorageResult<Option<NoticeObject>>;

    async fn upsert_notice(&self, notice: NoticeObject) -> StorageResult<()>;

    async fn list_silences(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
    ) -> StorageResult<Vec<SilenceRule>>;

    /// Persist a silence, typically after a status promotion
    async fn save_silence(&self, rule: &SilenceRule) -> StorageResult<()>;

    async fn list_probing_rules(&self) -> StorageResult<Vec<ProbingRule>>;

    async fn upsert_probing_rule(&self, rule: ProbingRule) -> StorageResult<()>;

    async fn subscriptions_for_rule(
        &self,
        tenant_id: &str,
        rule_id: &str,
    ) -> StorageResult<Vec<Subscription>>;

    async fn upsert_subscription(&self, subscription: Subscription) -> StorageResult<()>;
}

/// Append-only archive written by the engine
///
/// Implementations must be `Send + Sync` as they are shared by every
/// supervisor task.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Archive a recovered event removed from the cache
    async fn insert_history_event(&self, row: HistoryEventRow) -> StorageResult<()>;

    /// Record one probe execution
    async fn insert_probing_history(&self, row: ProbingHistoryRow) -> StorageResult<()>;

    /// Record one delivery attempt in the notification ledger
    async fn insert_notice_record(&self, record: NoticeRecord) -> StorageResult<()>;

    /// Archived events of one fault center, oldest first
    async fn query_history_events(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
    ) -> StorageResult<Vec<HistoryEventRow>>;

    /// The `limit` most recent ledger entries of a tenant, newest first
    async fn query_notice_records(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<NoticeRecord>>;

    /// Delete everything older than `before`
    ///
    /// Used for retention policy enforcement. Returns the number of rows
    /// deleted.
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
