//! Rows written by the engine to the history backend
//!
//! Everything here is append-only: archived alert events, probe results and
//! the notification ledger. Label sets and value maps are kept as typed maps
//! in memory and serialized to JSON only when a database writes them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AlertEvent, Labels, NoticeKind, Severity};

/// A recovered alert event moved out of the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEventRow {
    pub tenant_id: String,
    pub fault_center_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub fingerprint: String,
    pub severity: Severity,
    pub labels: Labels,
    pub annotations: String,
    pub first_trigger_time: i64,
    pub last_eval_time: i64,
    pub last_send_time: i64,
    pub recover_time: i64,
    pub archived_at: DateTime<Utc>,
}

impl HistoryEventRow {
    pub fn from_event(event: &AlertEvent, archived_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id: event.tenant_id.clone(),
            fault_center_id: event.fault_center_id.clone(),
            rule_id: event.rule_id.clone(),
            rule_name: event.rule_name.clone(),
            fingerprint: event.fingerprint.clone(),
            severity: event.severity,
            labels: event.labels.clone(),
            annotations: event.annotations.clone(),
            first_trigger_time: event.first_trigger_time,
            last_eval_time: event.last_eval_time,
            last_send_time: event.last_send_time,
            recover_time: event.recover_time,
            archived_at,
        }
    }
}

/// One probe execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbingHistoryRow {
    pub tenant_id: String,
    pub rule_id: String,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeOutcome {
    Success,
    Failed,
}

impl NoticeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeOutcome::Success => "success",
            NoticeOutcome::Failed => "failed",
        }
    }
}

/// Ledger entry for one delivery attempt, written whatever the outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeRecord {
    pub tenant_id: String,
    pub event_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub notice_kind: NoticeKind,
    pub notice_id: String,
    pub notice_name: String,
    pub is_recovered: bool,
    pub outcome: NoticeOutcome,
    pub content: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
