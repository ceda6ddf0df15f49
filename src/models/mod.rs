//! Domain types shared by the supervisors, dispatchers and collaborators

pub mod event;
pub mod fault_center;
pub mod notice;
pub mod probing;
pub mod silence;

use serde::{Deserialize, Serialize};

pub use event::{AlertEvent, AlertStatus, ConfirmState, LabelValue, Labels, Severity};
pub use fault_center::{AggregationType, FaultCenter, NoticeRoute, UpgradeStrategy};
pub use notice::{ChannelRoute, EmailFields, NoticeKind, NoticeObject};
pub use probing::{
    CompareOperator, HttpEndpoint, IcmpEndpoint, ProbeEndpoint, ProbeProtocol, ProbingEvent,
    ProbingRule, ProbingStrategy,
};
pub use silence::{LabelMatcher, MatchOperator, SilenceRule, SilenceStatus};

/// Per-user email subscription to one alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub tenant_id: String,
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub rule_id: String,
    #[serde(default)]
    pub severities: Vec<Severity>,

    /// Free-text filters, all of which must be found in the labels or annotations
    #[serde(default)]
    pub filters: Vec<String>,
}

/// An on-call user as resolved from a duty roster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyUser {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub feishu_id: String,
    #[serde(default)]
    pub dingding_id: String,
    #[serde(default)]
    pub slack_id: String,
}
