//! Alert events as they live in the shared event cache

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of an alert rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    P0,
    P1,
    P2,
    P3,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::P0 => "P0",
            Severity::P1 => "P1",
            Severity::P2 => "P2",
            Severity::P3 => "P3",
        };
        f.write_str(name)
    }
}

/// Life-cycle state of an alert event
///
/// ```text
/// PreAlert → Firing → PendingRecovery → Recovered
/// ```
///
/// `Silenced` is only ever written by the rule evaluator; muting done by this
/// engine never touches the stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    PreAlert,
    Firing,
    Silenced,
    PendingRecovery,
    Recovered,
}

/// A single label value
///
/// Rule evaluators emit arbitrary JSON scalars as label values. Only `Text`
/// values take part in regex matching (silences and notice routes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl LabelValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            LabelValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelValue::Text(value) => f.write_str(value),
            LabelValue::Integer(value) => write!(f, "{value}"),
            LabelValue::Float(value) => write!(f, "{value}"),
            LabelValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for LabelValue {
    fn from(value: &str) -> Self {
        LabelValue::Text(value.to_string())
    }
}

impl From<String> for LabelValue {
    fn from(value: String) -> Self {
        LabelValue::Text(value)
    }
}

pub type Labels = BTreeMap<String, LabelValue>;

/// Acknowledgement and escalation bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmState {
    /// Someone acknowledged the alert, escalation stops
    #[serde(default)]
    pub is_ok: bool,

    /// Unix seconds of the last escalation notice (0 = never escalated)
    #[serde(default)]
    pub timeout_send_time: i64,
}

/// Current state of one alert condition instance
///
/// Identity is `(tenant_id, fault_center_id, fingerprint)`. All timestamps
/// are Unix seconds, `0` meaning "never".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub tenant_id: String,
    pub rule_id: String,
    pub rule_name: String,
    #[serde(default)]
    pub fault_center_id: String,
    pub fingerprint: String,
    pub severity: Severity,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: String,
    pub status: AlertStatus,
    #[serde(default)]
    pub is_recovered: bool,
    #[serde(default)]
    pub first_trigger_time: i64,
    #[serde(default)]
    pub last_eval_time: i64,
    #[serde(default)]
    pub last_send_time: i64,
    #[serde(default)]
    pub recover_time: i64,
    #[serde(default)]
    pub confirm_state: ConfirmState,

    /// Mention string of the on-call users at the last delivery
    #[serde(default)]
    pub duty_user: String,
}

impl AlertEvent {
    pub fn is_firing(&self) -> bool {
        self.status == AlertStatus::Firing
    }

    /// Serialized label set, used for subscription filters and templates
    pub fn labels_json(&self) -> String {
        serde_json::to_string(&self.labels).unwrap_or_default()
    }

    pub fn label_text(&self, key: &str) -> Option<&str> {
        self.labels.get(key).and_then(LabelValue::as_text)
    }
}
