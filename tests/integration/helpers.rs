//! Helper functions for integration tests

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use alerting_engine::cache::Cache;
use alerting_engine::duty::{DutySchedule, StaticDutyRoster};
use alerting_engine::models::{
    AlertEvent, AlertStatus, ChannelRoute, ConfirmState, EmailFields, FaultCenter, LabelValue,
    NoticeKind, NoticeObject, ProbingRule, Severity,
};
use alerting_engine::notify::CardRenderer;
use alerting_engine::probing::{ProbeError, ProbeOutcome, Prober, ProberRegistry};
use alerting_engine::senders::{SendError, SendParams, Sender, SenderRegistry};
use alerting_engine::store::{ConfigStore, MemoryHistory, MemoryStore};
use alerting_engine::{Engine, EngineParts};
use async_trait::async_trait;

pub const TENANT: &str = "default";
pub const FAULT_CENTER: &str = "fc-1";
pub const NOTICE: &str = "n-1";

/// Sender that records every delivery and optionally fails
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SendParams>>,
    fail: bool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SendParams> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Events delivered through the custom hook channel, which carries the
    /// event as JSON
    pub fn events(&self) -> Vec<AlertEvent> {
        self.sent()
            .iter()
            .filter(|params| params.notice_kind == NoticeKind::CustomHook)
            .map(|params| serde_json::from_str(&params.content).unwrap())
            .collect()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, params: &SendParams) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(params.clone());
        if self.fail {
            return Err(SendError::Rejected("recording sender told to fail".to_string()));
        }
        Ok(())
    }

    async fn test(&self, params: &SendParams) -> Result<(), SendError> {
        self.send(params).await
    }
}

/// Prober replaying a fixed sequence of TCP results; `true` means connected
pub struct ScriptedProber {
    results: Mutex<VecDeque<bool>>,
}

impl ScriptedProber {
    pub fn new(results: impl IntoIterator<Item = bool>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn pilot(&self, rule: &ProbingRule) -> Result<ProbeOutcome, ProbeError> {
        let connected = self
            .results
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProbeError::Connect("script exhausted".to_string()))?;
        let value = if connected { 1.0 } else { 0.0 };
        Ok(ProbeOutcome::new(
            rule,
            BTreeMap::from([("IsSuccessful".to_string(), value)]),
        ))
    }
}

pub struct Harness {
    pub engine: Engine,
    pub cache: Cache,
    pub store: Arc<MemoryStore>,
    pub history: Arc<MemoryHistory>,
    pub sender: Arc<RecordingSender>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(RecordingSender::default()), None, ProberRegistry::new())
    }

    pub fn with_sender(sender: RecordingSender) -> Self {
        Self::with_parts(Arc::new(sender), None, ProberRegistry::new())
    }

    pub fn with_probers(probers: ProberRegistry) -> Self {
        Self::with_parts(Arc::new(RecordingSender::default()), None, probers)
    }

    /// Custom hook deliveries go to `hook` instead of the recording sender
    pub fn with_hook_sender(hook: Arc<dyn Sender>) -> Self {
        Self::with_parts(Arc::new(RecordingSender::default()), Some(hook), ProberRegistry::new())
    }

    fn with_parts(
        sender: Arc<RecordingSender>,
        hook: Option<Arc<dyn Sender>>,
        probers: ProberRegistry,
    ) -> Self {
        let cache = Cache::memory();
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistory::new());

        let hook = hook.unwrap_or_else(|| sender.clone());
        let senders = SenderRegistry::new()
            .with(NoticeKind::CustomHook, hook)
            .with(NoticeKind::Slack, sender.clone())
            .with(NoticeKind::Email, sender.clone());

        let engine = Engine::from_parts(EngineParts {
            cache: cache.clone(),
            store: store.clone(),
            history: history.clone(),
            senders: Arc::new(senders),
            renderer: Arc::new(CardRenderer::new()),
            duty: Arc::new(StaticDutyRoster::new(Vec::<DutySchedule>::new())),
            probers,
            subscription_concurrency: 4,
            retention: None,
        });

        Self {
            engine,
            cache,
            store,
            history,
            sender,
        }
    }

    /// Store a fault center and a custom hook notice for every severity
    pub async fn setup(&self, center: &FaultCenter) {
        self.store.upsert_fault_center(center.clone()).await.unwrap();
        self.cache.push_fault_center(center).await.unwrap();
        self.store.upsert_notice(hook_notice(NOTICE)).await.unwrap();
    }

    pub async fn push(&self, events: &[AlertEvent]) {
        for event in events {
            self.cache.push_event(event).await.unwrap();
        }
    }

    pub async fn cached(&self, fingerprint: &str) -> Option<AlertEvent> {
        self.cache
            .get_event(TENANT, FAULT_CENTER, fingerprint)
            .await
            .unwrap()
    }
}

pub fn fault_center() -> FaultCenter {
    serde_json::from_value(serde_json::json!({
        "tenant_id": TENANT,
        "id": FAULT_CENTER,
        "name": "core",
        "notice_ids": [NOTICE],
    }))
    .unwrap()
}

pub fn hook_notice(id: &str) -> NoticeObject {
    NoticeObject {
        tenant_id: TENANT.to_string(),
        id: id.to_string(),
        name: format!("notice {id}"),
        duty_id: None,
        routes: vec![ChannelRoute {
            kind: NoticeKind::CustomHook,
            template_id: String::new(),
            severities: vec![Severity::P0, Severity::P1, Severity::P2, Severity::P3],
            hook: "http://hooks.invalid/alert".to_string(),
            sign: String::new(),
            email: EmailFields::default(),
        }],
    }
}

pub fn firing_event(fingerprint: &str, severity: Severity, now: i64) -> AlertEvent {
    AlertEvent {
        tenant_id: TENANT.to_string(),
        rule_id: "r-1".to_string(),
        rule_name: "high cpu".to_string(),
        fault_center_id: FAULT_CENTER.to_string(),
        fingerprint: fingerprint.to_string(),
        severity,
        labels: BTreeMap::from([
            ("env".to_string(), LabelValue::from("prod")),
            ("instance".to_string(), LabelValue::from(fingerprint)),
        ]),
        annotations: "cpu above 90%".to_string(),
        status: AlertStatus::Firing,
        is_recovered: false,
        first_trigger_time: now,
        last_eval_time: now,
        last_send_time: 0,
        recover_time: 0,
        confirm_state: ConfirmState::default(),
        duty_user: String::new(),
    }
}

pub fn tcp_rule(failure: u32) -> ProbingRule {
    serde_json::from_value(serde_json::json!({
        "tenant_id": TENANT,
        "rule_id": "p-1",
        "rule_name": "db port",
        "protocol": "TCP",
        "endpoint": { "target": "db.internal:5432" },
        "strategy": {
            "timeout": 1,
            "eval_interval": 1,
            "operator": "==",
            "expected_value": 0.0,
            "field": "IsSuccessful",
            "failure": failure
        },
        "notice_id": NOTICE,
        "severity": "P1",
        "repeat_notice_interval": 5
    }))
    .unwrap()
}
