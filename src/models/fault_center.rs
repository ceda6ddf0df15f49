use serde::{Deserialize, Serialize};

use super::event::Severity;

/// How events of one group are collapsed before sending
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationType {
    /// Events of one rule and severity collapse into one notification
    Rule,

    #[default]
    #[serde(rename = "None", alias = "")]
    None,
}

/// Label based routing of events to notice objects
///
/// Routes are scanned in order; the first whose label `key` regex-matches
/// `value` supplies the notice ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeRoute {
    pub key: String,
    pub value: String,
    pub notice_ids: Vec<String>,
}

/// Re-notification of unacknowledged alerts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpgradeStrategy {
    #[serde(default)]
    pub enabled: bool,

    /// Minutes after the first trigger before the first escalation
    #[serde(default)]
    pub timeout: i64,

    /// Minimum minutes between two escalations of the same event
    #[serde(default)]
    pub repeat_interval: i64,

    #[serde(default)]
    pub notice_id: String,
}

/// Tenant scoped notification policy shared by a set of alert rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultCenter {
    pub tenant_id: String,
    pub id: String,
    #[serde(default)]
    pub name: String,

    /// Fallback notice ids when no route matches
    #[serde(default)]
    pub notice_ids: Vec<String>,

    #[serde(default)]
    pub notice_routes: Vec<NoticeRoute>,

    /// Minutes between two notifications of a still firing event
    #[serde(default)]
    pub repeat_notice_interval: i64,

    #[serde(default = "default_recover_notify")]
    pub recover_notify: bool,

    /// Seconds a recovery is held before it is notified and finalized
    #[serde(default)]
    pub recover_wait_time: i64,

    #[serde(default)]
    pub aggregation_type: AggregationType,

    #[serde(default)]
    pub upgrade_strategy: UpgradeStrategy,

    #[serde(default)]
    pub upgradable_severity: Vec<Severity>,
}

fn default_recover_notify() -> bool {
    true
}

impl FaultCenter {
    pub fn display(&self) -> String {
        if self.name.is_empty() {
            format!("{}/{}", self.tenant_id, self.id)
        } else {
            format!("{}/{}", self.tenant_id, self.name)
        }
    }
}
