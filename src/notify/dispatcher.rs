//! Notification fan-out for one notice object

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use tracing::{debug, error, instrument, trace, warn};

use crate::cache::Cache;
use crate::duty::{DutyRoster, format_mentions, phone_numbers};
use crate::error::{EngineError, EngineResult};
use crate::grouping::Aggregator;
use crate::models::{
    AlertEvent, ChannelRoute, DutyUser, FaultCenter, NoticeKind, NoticeObject, Severity,
    SilenceRule,
};
use crate::senders::{SendParams, SenderRegistry};
use crate::silence::SilenceEvaluator;
use crate::store::{ConfigStore, HistoryBackend, NoticeOutcome, NoticeRecord};

use super::subscription::SubscriptionDispatcher;
use super::template::TemplateRenderer;

/// How a batch of events is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Regular notification: stamps `last_send_time` and aggregates
    Notify,

    /// Escalation notice: delivered as is
    Upgrade,
}

pub struct NotificationDispatcher {
    cache: Cache,
    store: Arc<dyn ConfigStore>,
    history: Arc<dyn HistoryBackend>,
    senders: Arc<SenderRegistry>,
    renderer: Arc<dyn TemplateRenderer>,
    duty: Arc<dyn DutyRoster>,
    subscriptions: Arc<SubscriptionDispatcher>,
}

impl NotificationDispatcher {
    pub fn new(
        cache: Cache,
        store: Arc<dyn ConfigStore>,
        history: Arc<dyn HistoryBackend>,
        senders: Arc<SenderRegistry>,
        renderer: Arc<dyn TemplateRenderer>,
        duty: Arc<dyn DutyRoster>,
        subscriptions: Arc<SubscriptionDispatcher>,
    ) -> Self {
        Self {
            cache,
            store,
            history,
            senders,
            renderer,
            duty,
            subscriptions,
        }
    }

    /// Notify one (rule, notice) group; returns the events handed to the senders
    pub async fn handle_alert(
        &self,
        center: &FaultCenter,
        notice_id: &str,
        events: Vec<AlertEvent>,
        now: i64,
    ) -> EngineResult<Vec<AlertEvent>> {
        self.dispatch(center, notice_id, events, now, DispatchMode::Notify)
            .await
    }

    /// Deliver with an explicit mode
    ///
    /// Severity buckets run concurrently; a failing bucket does not cancel
    /// its siblings and all failures are reported together. On success the
    /// delivered events are returned, after muting and aggregation.
    #[instrument(skip(self, center, events), fields(fault_center = %center.id, count = events.len()))]
    pub async fn dispatch(
        &self,
        center: &FaultCenter,
        notice_id: &str,
        events: Vec<AlertEvent>,
        now: i64,
        mode: DispatchMode,
    ) -> EngineResult<Vec<AlertEvent>> {
        let notice = self.resolve_notice(&center.tenant_id, notice_id).await?;
        let silences = self
            .cache
            .list_silences(&center.tenant_id, &center.id)
            .await?;

        let mut buckets: BTreeMap<Severity, Vec<AlertEvent>> = BTreeMap::new();
        for event in events {
            buckets.entry(event.severity).or_default().push(event);
        }

        let results = join_all(buckets.into_iter().map(|(severity, events)| {
            let notice = &notice;
            let silences = &silences;
            async move {
                self.dispatch_severity(center, notice, silences, severity, events, now, mode)
                    .await
                    .map_err(|e| format!("{severity}: {e}"))
            }
        }))
        .await;

        let mut delivered = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(events) => delivered.extend(events),
                Err(e) => failures.push(e),
            }
        }

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(EngineError::Dispatch(failures))
        }
    }

    /// Stamp, mute, aggregate and send one severity bucket
    ///
    /// Muted events are dropped before aggregation, so a collapsed count only
    /// covers the events that are actually notified. Their `last_send_time`
    /// is still stamped.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_severity(
        &self,
        center: &FaultCenter,
        notice: &NoticeObject,
        silences: &[SilenceRule],
        severity: Severity,
        events: Vec<AlertEvent>,
        now: i64,
        mode: DispatchMode,
    ) -> EngineResult<Vec<AlertEvent>> {
        let mut pending = Vec::with_capacity(events.len());
        for mut event in events {
            if mode == DispatchMode::Notify && event.is_firing() && !event.is_recovered {
                event.last_send_time = now;
                self.cache.push_event(&event).await?;
            }

            if SilenceEvaluator::is_muted(&event, center, silences) {
                trace!(fingerprint = %event.fingerprint, "muted, not sent");
                continue;
            }
            pending.push(event);
        }

        let outgoing = match mode {
            DispatchMode::Notify => {
                let aggregation = Aggregator::aggregate(center.aggregation_type, pending, now);
                for event in &aggregation.refreshed {
                    self.cache.push_event(event).await?;
                }
                aggregation.outgoing
            }
            DispatchMode::Upgrade => pending,
        };

        if outgoing.is_empty() {
            return Ok(outgoing);
        }

        let routes: Vec<&ChannelRoute> = notice
            .routes
            .iter()
            .filter(|route| route.applies_to(severity))
            .collect();
        if routes.is_empty() {
            debug!(notice = %notice.id, "no route for severity {}", severity);
        }

        let on_call = self.on_call(notice, now).await;
        for event in &outgoing {
            for route in &routes {
                self.deliver(notice, route, event, &on_call, now).await;
            }
        }

        Ok(outgoing)
    }

    /// Email the subscribers of each event once
    ///
    /// Called once per tick with the events delivered across all notice
    /// objects, so an event routed to several notices is not emailed twice.
    pub async fn notify_subscribers(&self, events: &[AlertEvent]) {
        for event in events {
            if let Err(e) = self.subscriptions.dispatch(event).await {
                warn!(fingerprint = %event.fingerprint, "subscription dispatch failed: {}", e);
            }
        }
    }

    /// Send one event to every applicable route of a notice object
    ///
    /// Used for events that live outside a fault center (probing).
    #[instrument(skip(self, event), fields(fingerprint = %event.fingerprint))]
    pub async fn deliver_to_notice(
        &self,
        tenant_id: &str,
        notice_id: &str,
        event: &AlertEvent,
        now: i64,
    ) -> EngineResult<()> {
        let notice = self.resolve_notice(tenant_id, notice_id).await?;
        let on_call = self.on_call(&notice, now).await;

        for route in notice.routes.iter().filter(|r| r.applies_to(event.severity)) {
            self.deliver(&notice, route, event, &on_call, now).await;
        }

        Ok(())
    }

    async fn resolve_notice(&self, tenant_id: &str, notice_id: &str) -> EngineResult<NoticeObject> {
        self.store
            .get_notice(tenant_id, notice_id)
            .await?
            .ok_or_else(|| EngineError::not_found("notice", notice_id))
    }

    async fn on_call(&self, notice: &NoticeObject, now: i64) -> Vec<DutyUser> {
        let Some(duty_id) = notice.duty_id.as_deref().filter(|id| !id.is_empty()) else {
            return Vec::new();
        };

        match self
            .duty
            .get_on_call(&notice.tenant_id, duty_id, date_of(now))
            .await
        {
            Ok(users) => users,
            Err(e) => {
                warn!(duty = %duty_id, "failed to resolve on-call users: {}", e);
                Vec::new()
            }
        }
    }

    /// Render, send and record one (event, route) pair; failures stay here
    async fn deliver(
        &self,
        notice: &NoticeObject,
        route: &ChannelRoute,
        event: &AlertEvent,
        on_call: &[DutyUser],
        now: i64,
    ) {
        let mut event = event.clone();
        event.duty_user = format_mentions(route.kind, on_call);

        let content = match route.kind {
            NoticeKind::CustomHook => serde_json::to_string(&event).unwrap_or_default(),
            _ => self.renderer.render(&event, notice, route),
        };

        let params = SendParams {
            tenant_id: event.tenant_id.clone(),
            event_id: event.fingerprint.clone(),
            rule_name: event.rule_name.clone(),
            severity: event.severity,
            notice_kind: route.kind,
            notice_id: notice.id.clone(),
            notice_name: notice.name.clone(),
            is_recovered: event.is_recovered,
            hook: route.hook.clone(),
            email: route.email.clone(),
            content,
            phone_numbers: phone_numbers(on_call),
            sign: route.sign.clone(),
        };

        let result = self.senders.send(&params).await;
        if let Err(e) = &result {
            error!(
                fingerprint = %event.fingerprint,
                notice = %notice.id,
                "failed to send {} notification: {}", route.kind, e
            );
        }

        let record = NoticeRecord {
            tenant_id: params.tenant_id,
            event_id: params.event_id,
            rule_name: params.rule_name,
            severity: params.severity,
            notice_kind: params.notice_kind,
            notice_id: params.notice_id,
            notice_name: params.notice_name,
            is_recovered: params.is_recovered,
            outcome: if result.is_ok() {
                NoticeOutcome::Success
            } else {
                NoticeOutcome::Failed
            },
            content: params.content,
            error: result.err().map(|e| e.to_string()),
            created_at: DateTime::from_timestamp(now, 0).unwrap_or_else(Utc::now),
        };

        if let Err(e) = self.history.insert_notice_record(record).await {
            warn!("failed to record notification: {}", e);
        }
    }
}

fn date_of(now: i64) -> NaiveDate {
    DateTime::from_timestamp(now, 0)
        .unwrap_or_else(Utc::now)
        .date_naive()
}
