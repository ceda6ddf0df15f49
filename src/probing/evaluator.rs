//! Flap-damped evaluation of probe results
//!
//! A rule fires after `strategy.failure` consecutive failing probes and
//! recovers after [`RECOVERY_THRESHOLD`] consecutive passing ones.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, instrument, trace, warn};

use crate::cache::Cache;
use crate::error::EngineResult;
use crate::models::{AlertEvent, AlertStatus, ConfirmState, ProbeProtocol, ProbingEvent, ProbingRule};

use super::prober::ProbeOutcome;

/// Consecutive passing probes needed to recover a firing rule
pub const RECOVERY_THRESHOLD: u32 = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Streak {
    pub fail: u32,
    pub ok: u32,
}

/// Consecutive failure/success counts of every probing rule
///
/// One lock covers all rules; every operation holds it for O(1) work.
#[derive(Debug, Default)]
pub struct FrequencyCounters {
    streaks: Mutex<HashMap<String, Streak>>,
}

impl FrequencyCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, rule_id: &str) -> Streak {
        let streaks = self.streaks.lock().unwrap_or_else(|e| e.into_inner());
        streaks.get(rule_id).copied().unwrap_or_default()
    }

    /// Count a failure and return the new failure streak
    pub fn record_failure(&self, rule_id: &str) -> u32 {
        let mut streaks = self.streaks.lock().unwrap_or_else(|e| e.into_inner());
        let streak = streaks.entry(rule_id.to_string()).or_default();
        streak.ok = 0;
        streak.fail += 1;
        streak.fail
    }

    /// Count a success and return the new success streak
    pub fn record_success(&self, rule_id: &str) -> u32 {
        let mut streaks = self.streaks.lock().unwrap_or_else(|e| e.into_inner());
        let streak = streaks.entry(rule_id.to_string()).or_default();
        streak.fail = 0;
        streak.ok += 1;
        streak.ok
    }

    /// Zero both streaks but keep tracking the rule
    pub fn reset(&self, rule_id: &str) {
        let mut streaks = self.streaks.lock().unwrap_or_else(|e| e.into_inner());
        streaks.insert(rule_id.to_string(), Streak::default());
    }

    pub fn clear(&self, rule_id: &str) {
        let mut streaks = self.streaks.lock().unwrap_or_else(|e| e.into_inner());
        streaks.remove(rule_id);
    }
}

/// What a single evaluation did to the cached probing event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Counters moved, the cache was not touched
    Unchanged,
    Firing,
    Recovered,
}

/// Whether a probe result counts as a failure for its rule
pub fn is_failure(rule: &ProbingRule, outcome: &ProbeOutcome) -> bool {
    if rule.protocol == ProbeProtocol::Tcp {
        return outcome.values.get("IsSuccessful").copied().unwrap_or(0.0) == 0.0;
    }

    let strategy = &rule.strategy;
    match outcome.values.get(&strategy.field) {
        Some(value) => strategy.operator.compare(*value, strategy.expected_value),
        None => {
            warn!(
                rule_id = %rule.rule_id,
                "probe result has no field '{}'", strategy.field
            );
            false
        }
    }
}

fn describe(rule: &ProbingRule, outcome: &ProbeOutcome) -> String {
    if !rule.annotations.is_empty() {
        return rule.annotations.clone();
    }

    let values = outcome
        .values
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} {}: {}", rule.protocol, rule.endpoint.target, values)
}

pub struct ProbingEvaluator {
    cache: Cache,
    counters: FrequencyCounters,
}

impl ProbingEvaluator {
    pub fn new(cache: Cache) -> Self {
        Self {
            cache,
            counters: FrequencyCounters::new(),
        }
    }

    pub fn counters(&self) -> &FrequencyCounters {
        &self.counters
    }

    #[instrument(skip_all, fields(rule_id = %rule.rule_id))]
    pub async fn evaluate(
        &self,
        rule: &ProbingRule,
        outcome: &ProbeOutcome,
        now: i64,
    ) -> EngineResult<Transition> {
        if is_failure(rule, outcome) {
            self.on_failure(rule, outcome, now).await
        } else {
            self.on_success(rule, outcome, now).await
        }
    }

    async fn on_failure(
        &self,
        rule: &ProbingRule,
        outcome: &ProbeOutcome,
        now: i64,
    ) -> EngineResult<Transition> {
        let streak = self.counters.record_failure(&rule.rule_id);
        trace!("failure streak {}/{}", streak, rule.strategy.failure);
        if streak < rule.strategy.failure.max(1) {
            return Ok(Transition::Unchanged);
        }

        let existing = self
            .cache
            .get_probing_event(&rule.tenant_id, &rule.rule_id)
            .await?
            .filter(|cached| !cached.event.is_recovered);

        let (first_trigger_time, last_send_time, confirm_state) = match existing {
            Some(cached) => (
                cached.event.first_trigger_time,
                cached.event.last_send_time,
                cached.event.confirm_state,
            ),
            None => (now, 0, ConfirmState::default()),
        };

        let event = ProbingEvent {
            event: AlertEvent {
                tenant_id: rule.tenant_id.clone(),
                rule_id: rule.rule_id.clone(),
                rule_name: rule.rule_name.clone(),
                fault_center_id: String::new(),
                fingerprint: outcome.fingerprint.clone(),
                severity: rule.severity,
                labels: outcome.labels.clone(),
                annotations: describe(rule, outcome),
                status: AlertStatus::Firing,
                is_recovered: false,
                first_trigger_time,
                last_eval_time: now,
                last_send_time,
                recover_time: 0,
                confirm_state,
                duty_user: String::new(),
            },
            metrics: outcome.values.clone(),
        };
        self.cache.push_probing_event(&event).await?;
        self.counters.reset(&rule.rule_id);

        debug!("probing rule firing");
        Ok(Transition::Firing)
    }

    async fn on_success(
        &self,
        rule: &ProbingRule,
        outcome: &ProbeOutcome,
        now: i64,
    ) -> EngineResult<Transition> {
        let cached = self
            .cache
            .get_probing_event(&rule.tenant_id, &rule.rule_id)
            .await?;
        let Some(mut cached) = cached.filter(|cached| !cached.event.is_recovered) else {
            self.counters.reset(&rule.rule_id);
            return Ok(Transition::Unchanged);
        };

        let streak = self.counters.record_success(&rule.rule_id);
        trace!("success streak {}/{}", streak, RECOVERY_THRESHOLD);
        if streak < RECOVERY_THRESHOLD {
            return Ok(Transition::Unchanged);
        }

        let event = &mut cached.event;
        event.labels = outcome.labels.clone();
        event.annotations = describe(rule, outcome);
        event.is_recovered = true;
        event.status = AlertStatus::Recovered;
        event.last_eval_time = now;
        event.recover_time = now;
        event.last_send_time = 0;
        cached.metrics = outcome.values.clone();

        self.cache.push_probing_event(&cached).await?;
        self.counters.reset(&rule.rule_id);

        debug!("probing rule recovered");
        Ok(Transition::Recovered)
    }
}
