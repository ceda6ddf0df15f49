use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOperator {
    /// Label value matches the regex
    #[serde(rename = "==")]
    Equal,

    /// Label value does not match the regex
    #[serde(rename = "!=")]
    NotEqual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMatcher {
    pub key: String,
    pub operator: MatchOperator,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilenceStatus {
    #[default]
    Pending,
    Active,
    Expired,
}

/// Time windowed, label matching suppression rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceRule {
    pub tenant_id: String,
    pub fault_center_id: String,
    pub id: String,
    #[serde(default)]
    pub labels: Vec<LabelMatcher>,

    /// Unix seconds
    pub starts_at: i64,

    /// Unix seconds
    pub ends_at: i64,

    #[serde(default)]
    pub status: SilenceStatus,

    #[serde(default)]
    pub comment: String,
}

impl SilenceRule {
    /// Status this rule should have at `now`
    pub fn status_at(&self, now: i64) -> SilenceStatus {
        match self.status {
            SilenceStatus::Expired => SilenceStatus::Expired,
            _ if now >= self.ends_at => SilenceStatus::Expired,
            SilenceStatus::Pending if now >= self.starts_at => SilenceStatus::Active,
            status => status,
        }
    }
}
