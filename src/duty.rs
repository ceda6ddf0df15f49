//! On-call resolution and channel mentions

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;

use crate::models::{DutyUser, NoticeKind};
use crate::store::StorageResult;

/// Resolves who is on call for a duty schedule on a given date
#[async_trait]
pub trait DutyRoster: Send + Sync {
    async fn get_on_call(
        &self,
        tenant_id: &str,
        duty_id: &str,
        date: NaiveDate,
    ) -> StorageResult<Vec<DutyUser>>;
}

/// One duty schedule as found in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct DutySchedule {
    pub tenant_id: String,
    pub id: String,

    /// Everyone who can be on call, in rotation order
    #[serde(default)]
    pub users: Vec<DutyUser>,

    /// Explicit assignments (user ids) overriding the rotation
    #[serde(default)]
    pub schedule: BTreeMap<NaiveDate, Vec<String>>,

    /// Days each user of the rotation stays on call
    #[serde(default = "default_rotation_days")]
    pub rotation_days: u32,
}

fn default_rotation_days() -> u32 {
    1
}

impl DutySchedule {
    pub fn on_call(&self, date: NaiveDate) -> Vec<DutyUser> {
        if let Some(user_ids) = self.schedule.get(&date) {
            return user_ids
                .iter()
                .filter_map(|id| self.users.iter().find(|user| &user.user_id == id))
                .cloned()
                .collect();
        }

        if self.users.is_empty() {
            return Vec::new();
        }

        let day = date.num_days_from_ce().max(0) as usize;
        let slot = day / self.rotation_days.max(1) as usize;
        vec![self.users[slot % self.users.len()].clone()]
    }
}

/// Roster built from the config file
#[derive(Debug, Default)]
pub struct StaticDutyRoster {
    schedules: HashMap<(String, String), DutySchedule>,
}

impl StaticDutyRoster {
    pub fn new(schedules: Vec<DutySchedule>) -> Self {
        Self {
            schedules: schedules
                .into_iter()
                .map(|s| ((s.tenant_id.clone(), s.id.clone()), s))
                .collect(),
        }
    }
}

#[async_trait]
impl DutyRoster for StaticDutyRoster {
    async fn get_on_call(
        &self,
        tenant_id: &str,
        duty_id: &str,
        date: NaiveDate,
    ) -> StorageResult<Vec<DutyUser>> {
        Ok(self
            .schedules
            .get(&(tenant_id.to_string(), duty_id.to_string()))
            .map(|schedule| schedule.on_call(date))
            .unwrap_or_default())
    }
}

/// Mention string for the on-call users in a channel's own syntax
pub fn format_mentions(kind: NoticeKind, users: &[DutyUser]) -> String {
    let mentions: Vec<String> = users
        .iter()
        .filter_map(|user| match kind {
            NoticeKind::FeiShu => non_empty(&user.feishu_id).map(|id| format!("<at id={id}></at>")),
            NoticeKind::DingDing => non_empty(&user.dingding_id).map(|id| format!("@{id}")),
            NoticeKind::Slack => non_empty(&user.slack_id).map(|id| format!("<@{id}>")),
            NoticeKind::PhoneCall => non_empty(&user.phone).map(str::to_string),
            NoticeKind::Email | NoticeKind::WeChat | NoticeKind::CustomHook => {
                non_empty(&user.username).map(str::to_string)
            }
        })
        .collect();

    mentions.join(" ")
}

/// Phone numbers of the on-call users, for phone call channels
pub fn phone_numbers(users: &[DutyUser]) -> Vec<String> {
    users
        .iter()
        .filter(|user| !user.phone.is_empty())
        .map(|user| user.phone.clone())
        .collect()
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}
