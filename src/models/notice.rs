use std::fmt;

use serde::{Deserialize, Serialize};

use super::event::Severity;

/// Delivery channel of a notice route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoticeKind {
    Email,
    FeiShu,
    DingDing,
    WeChat,
    Slack,
    CustomHook,
    PhoneCall,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NoticeKind::Email => "Email",
            NoticeKind::FeiShu => "FeiShu",
            NoticeKind::DingDing => "DingDing",
            NoticeKind::WeChat => "WeChat",
            NoticeKind::Slack => "Slack",
            NoticeKind::CustomHook => "CustomHook",
            NoticeKind::PhoneCall => "PhoneCall",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailFields {
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub subject: String,
}

/// One delivery target of a notice object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRoute {
    pub kind: NoticeKind,
    #[serde(default)]
    pub template_id: String,

    /// Severities this route delivers
    #[serde(default)]
    pub severities: Vec<Severity>,

    #[serde(default)]
    pub hook: String,

    /// Signing secret for robots that require one (DingDing, FeiShu)
    #[serde(default)]
    pub sign: String,

    #[serde(default)]
    pub email: EmailFields,
}

impl ChannelRoute {
    pub fn applies_to(&self, severity: Severity) -> bool {
        self.severities.contains(&severity)
    }
}

/// Named notification target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeObject {
    pub tenant_id: String,
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub duty_id: Option<String>,
    #[serde(default)]
    pub routes: Vec<ChannelRoute>,
}
