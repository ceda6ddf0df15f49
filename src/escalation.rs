//! Escalation of unacknowledged alerts
//!
//! Runs over the raw fetched event set, independent of the notify gate. An
//! event escalates once `timeout` minutes passed since it first triggered and
//! then at most every `repeat_interval` minutes until someone confirms it.

use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::cache::Cache;
use crate::error::EngineResult;
use crate::models::{AlertEvent, AlertStatus, FaultCenter, SilenceRule};
use crate::notify::{DispatchMode, NotificationDispatcher};
use crate::silence::SilenceEvaluator;

pub struct EscalationTracker {
    cache: Cache,
    dispatcher: Arc<NotificationDispatcher>,
}

impl EscalationTracker {
    pub fn new(cache: Cache, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { cache, dispatcher }
    }

    pub fn is_candidate(center: &FaultCenter, event: &AlertEvent, silences: &[SilenceRule]) -> bool {
        !matches!(
            event.status,
            AlertStatus::PreAlert | AlertStatus::PendingRecovery | AlertStatus::Silenced
        ) && center.upgradable_severity.contains(&event.severity)
            && !event.is_recovered
            && !SilenceEvaluator::is_muted(event, center, silences)
    }

    /// Whether an unconfirmed candidate is due for an escalation notice
    pub fn is_due(center: &FaultCenter, event: &AlertEvent, now: i64) -> bool {
        if event.confirm_state.is_ok {
            return false;
        }

        let strategy = &center.upgrade_strategy;
        if now - event.first_trigger_time <= strategy.timeout * 60 {
            return false;
        }

        let last = event.confirm_state.timeout_send_time;
        last == 0 || now > last + strategy.repeat_interval * 60
    }

    /// Collapse escalated events into the one notice that is sent
    pub fn collapse(mut escalated: Vec<AlertEvent>) -> Option<AlertEvent> {
        let count = escalated.len();
        if count == 0 {
            return None;
        }

        let mut first = escalated.swap_remove(0);
        if count > 1 {
            first.annotations.push_str(&format!("\n[{count} aggregated]"));
        }
        Some(first)
    }

    /// Escalate due events of one fault center
    ///
    /// Returns the number of events escalated.
    #[instrument(skip_all, fields(fault_center = %center.id))]
    pub async fn run(
        &self,
        center: &FaultCenter,
        events: &[AlertEvent],
        silences: &[SilenceRule],
        now: i64,
    ) -> EngineResult<usize> {
        if !center.upgrade_strategy.enabled {
            return Ok(0);
        }

        let mut escalated = Vec::new();
        for event in events {
            if !Self::is_candidate(center, event, silences) || !Self::is_due(center, event, now) {
                continue;
            }

            // stamp the current cached copy; the dispatcher may have updated it this tick
            let Some(mut current) = self
                .cache
                .get_event(&event.tenant_id, &event.fault_center_id, &event.fingerprint)
                .await?
            else {
                trace!(fingerprint = %event.fingerprint, "event left the cache, not escalated");
                continue;
            };

            current.confirm_state.timeout_send_time = now;
            self.cache.push_event(&current).await?;
            escalated.push(current);
        }

        let count = escalated.len();
        let Some(notice) = Self::collapse(escalated) else {
            return Ok(0);
        };

        let notice_id = &center.upgrade_strategy.notice_id;
        if notice_id.is_empty() {
            debug!("{} event(s) escalated without an upgrade notice", count);
            return Ok(count);
        }

        debug!("escalating {} event(s) to notice {}", count, notice_id);
        self.dispatcher
            .dispatch(center, notice_id, vec![notice], now, DispatchMode::Upgrade)
            .await?;

        Ok(count)
    }
}
