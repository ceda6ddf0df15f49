//! In-memory store implementations
//!
//! [`MemoryStore`] holds the configuration seeded from the engine config
//! file. [`MemoryHistory`] keeps a bounded archive and is the default history
//! backend when no database is configured.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited capacity**: the history buffers are capped, oldest rows are
//!   evicted first

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{FaultCenter, NoticeObject, ProbingRule, SilenceRule, Subscription};

use super::backend::{ConfigStore, HealthStatus, HistoryBackend};
use super::error::StorageResult;
use super::schema::{HistoryEventRow, NoticeRecord, ProbingHistoryRow};

/// Maximum rows kept per history buffer
const MAX_HISTORY_ROWS: usize = 10_000;

type TenantKey = (String, String);

fn key(tenant_id: &str, id: &str) -> TenantKey {
    (tenant_id.to_string(), id.to_string())
}

#[derive(Default)]
pub struct MemoryStore {
    fault_centers: RwLock<HashMap<TenantKey, FaultCenter>>,
    notices: RwLock<HashMap<TenantKey, NoticeObject>>,
    silences: RwLock<HashMap<TenantKey, SilenceRule>>,
    probing_rules: RwLock<HashMap<TenantKey, ProbingRule>>,
    subscriptions: RwLock<HashMap<TenantKey, Subscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn list_fault_centers(&self) -> StorageResult<Vec<FaultCenter>> {
        let centers = self.fault_centers.read().unwrap_or_else(|e| e.into_inner());
        let mut centers: Vec<_> = centers.values().cloned().collect();
        centers.sort_by(|a, b| (&a.tenant_id, &a.id).cmp(&(&b.tenant_id, &b.id)));
        Ok(centers)
    }

    async fn get_fault_center(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> StorageResult<Option<FaultCenter>> {
        let centers = self.fault_centers.read().unwrap_or_else(|e| e.into_inner());
        Ok(centers.get(&key(tenant_id, id)).cloned())
    }

    async fn upsert_fault_center(&self, center: FaultCenter) -> StorageResult<()> {
        let mut centers = self.fault_centers.write().unwrap_or_else(|e| e.into_inner());
        centers.insert(key(&center.tenant_id, &center.id), center);
        Ok(())
    }

    async fn get_notice(&self, tenant_id: &str, id: &str) -> StorageResult<Option<NoticeObject>> {
        let notices = self.notices.read().unwrap_or_else(|e| e.into_inner());
        Ok(notices.get(&key(tenant_id, id)).cloned())
    }

    async fn upsert_notice(&self, notice: NoticeObject) -> StorageResult<()> {
        let mut notices = self.notices.write().unwrap_or_else(|e| e.into_inner());
        notices.insert(key(&notice.tenant_id, &notice.id), notice);
        Ok(())
    }

    async fn list_silences(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
    ) -> StorageResult<Vec<SilenceRule>> {
        let silences = self.silences.read().unwrap_or_else(|e| e.into_inner());
        Ok(silences
            .values()
            .filter(|rule| rule.tenant_id == tenant_id && rule.fault_center_id == fault_center_id)
            .cloned()
            .collect())
    }

    async fn save_silence(&self, rule: &SilenceRule) -> StorageResult<()> {
        let mut silences = self.silences.write().unwrap_or_else(|e| e.into_inner());
        silences.insert(key(&rule.tenant_id, &rule.id), rule.clone());
        Ok(())
    }

    async fn list_probing_rules(&self) -> StorageResult<Vec<ProbingRule>> {
        let rules = self.probing_rules.read().unwrap_or_else(|e| e.into_inner());
        let mut rules: Vec<_> = rules.values().cloned().collect();
        rules.sort_by(|a, b| (&a.tenant_id, &a.rule_id).cmp(&(&b.tenant_id, &b.rule_id)));
        Ok(rules)
    }

    async fn upsert_probing_rule(&self, rule: ProbingRule) -> StorageResult<()> {
        let mut rules = self.probing_rules.write().unwrap_or_else(|e| e.into_inner());
        rules.insert(key(&rule.tenant_id, &rule.rule_id), rule);
        Ok(())
    }

    async fn subscriptions_for_rule(
        &self,
        tenant_id: &str,
        rule_id: &str,
    ) -> StorageResult<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<_> = subscriptions
            .values()
            .filter(|sub| sub.tenant_id == tenant_id && sub.rule_id == rule_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn upsert_subscription(&self, subscription: Subscription) -> StorageResult<()> {
        let mut subscriptions = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        subscriptions.insert(key(&subscription.tenant_id, &subscription.id), subscription);
        Ok(())
    }
}

/// Bounded in-memory archive
#[derive(Default)]
pub struct MemoryHistory {
    events: Mutex<VecDeque<HistoryEventRow>>,
    probes: Mutex<VecDeque<ProbingHistoryRow>>,
    notices: Mutex<VecDeque<NoticeRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe results of one rule, oldest first
    pub fn probing_history(&self, tenant_id: &str, rule_id: &str) -> Vec<ProbingHistoryRow> {
        let probes = self.probes.lock().unwrap_or_else(|e| e.into_inner());
        probes
            .iter()
            .filter(|row| row.tenant_id == tenant_id && row.rule_id == rule_id)
            .cloned()
            .collect()
    }
}

fn push_bounded<T>(buffer: &Mutex<VecDeque<T>>, row: T) {
    let mut buffer = buffer.lock().unwrap_or_else(|e| e.into_inner());
    if buffer.len() >= MAX_HISTORY_ROWS {
        buffer.pop_front();
    }
    buffer.push_back(row);
}

#[async_trait]
impl HistoryBackend for MemoryHistory {
    async fn insert_history_event(&self, row: HistoryEventRow) -> StorageResult<()> {
        push_bounded(&self.events, row);
        Ok(())
    }

    async fn insert_probing_history(&self, row: ProbingHistoryRow) -> StorageResult<()> {
        push_bounded(&self.probes, row);
        Ok(())
    }

    async fn insert_notice_record(&self, record: NoticeRecord) -> StorageResult<()> {
        push_bounded(&self.notices, record);
        Ok(())
    }

    async fn query_history_events(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
    ) -> StorageResult<Vec<HistoryEventRow>> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        Ok(events
            .iter()
            .filter(|row| row.tenant_id == tenant_id && row.fault_center_id == fault_center_id)
            .cloned()
            .collect())
    }

    async fn query_notice_records(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<NoticeRecord>> {
        let notices = self.notices.lock().unwrap_or_else(|e| e.into_inner());
        Ok(notices
            .iter()
            .rev()
            .filter(|record| record.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        debug!("cleanup requested for history before {}", before);

        let mut deleted = 0;
        {
            let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            let len = events.len();
            events.retain(|row| row.archived_at >= before);
            deleted += len - events.len();
        }
        {
            let mut probes = self.probes.lock().unwrap_or_else(|e| e.into_inner());
            let len = probes.len();
            probes.retain(|row| row.timestamp >= before);
            deleted += len - probes.len();
        }
        {
            let mut notices = self.notices.lock().unwrap_or_else(|e| e.into_inner());
            let len = notices.len();
            notices.retain(|record| record.created_at >= before);
            deleted += len - notices.len();
        }

        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner()).len();
        let notices = self.notices.lock().unwrap_or_else(|e| e.into_inner()).len();

        Ok(HealthStatus {
            healthy: true,
            message: "In-memory history operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("history_events".to_string(), events.to_string()),
                ("notice_records".to_string(), notices.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory history (no-op)");
        Ok(())
    }
}
