//! Production side of probing: one loop per rule that probes and evaluates

use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::Cache;
use crate::error::EngineResult;
use crate::models::ProbingRule;
use crate::store::{ConfigStore, HistoryBackend, ProbingHistoryRow};
use crate::supervisor::{TaskRegistry, panic_message};

use super::evaluator::{FrequencyCounters, ProbingEvaluator, Transition};
use super::prober::ProberRegistry;

struct Inner {
    store: Arc<dyn ConfigStore>,
    history: Arc<dyn HistoryBackend>,
    probers: ProberRegistry,
    evaluator: ProbingEvaluator,
    registry: TaskRegistry,
}

#[derive(Clone)]
pub struct ProbingSupervisor {
    inner: Arc<Inner>,
}

impl ProbingSupervisor {
    pub fn new(
        cache: Cache,
        store: Arc<dyn ConfigStore>,
        history: Arc<dyn HistoryBackend>,
        probers: ProberRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                history,
                probers,
                evaluator: ProbingEvaluator::new(cache),
                registry: TaskRegistry::new(),
            }),
        }
    }

    fn task_id(tenant_id: &str, rule_id: &str) -> String {
        format!("{tenant_id}/{rule_id}")
    }

    pub fn counters(&self) -> &FrequencyCounters {
        self.inner.evaluator.counters()
    }

    /// Start probing a rule; a disabled rule is stopped instead
    pub fn submit(&self, rule: ProbingRule) {
        if !rule.enabled {
            self.stop(&rule.tenant_id, &rule.rule_id);
            return;
        }
        self.spawn_loop(rule);
    }

    pub fn stop(&self, tenant_id: &str, rule_id: &str) -> bool {
        self.inner.evaluator.counters().clear(rule_id);
        let stopped = self
            .inner
            .registry
            .cancel(&Self::task_id(tenant_id, rule_id));
        if stopped {
            debug!("stopped probing rule {}/{}", tenant_id, rule_id);
        }
        stopped
    }

    pub fn restart(&self, rule: ProbingRule) {
        self.stop(&rule.tenant_id, &rule.rule_id);
        self.submit(rule);
    }

    /// Start every enabled persisted rule; returns how many were started
    pub async fn start_all(&self) -> EngineResult<usize> {
        let rules = self.inner.store.list_probing_rules().await?;
        let mut started = 0;
        for rule in rules.into_iter().filter(|rule| rule.enabled) {
            self.restart(rule);
            started += 1;
        }
        info!("started {} probing rule(s)", started);
        Ok(started)
    }

    pub fn is_running(&self, tenant_id: &str, rule_id: &str) -> bool {
        self.inner
            .registry
            .contains(&Self::task_id(tenant_id, rule_id))
    }

    pub fn stop_all(&self) {
        self.inner.registry.cancel_all();
    }

    fn spawn_loop(&self, rule: ProbingRule) {
        let token = self
            .inner
            .registry
            .register(&Self::task_id(&rule.tenant_id, &rule.rule_id));
        tokio::spawn(self.clone().run(rule, token));
    }

    fn run(self, rule: ProbingRule, token: CancellationToken) -> BoxFuture<'static, ()> {
        async move {
            debug!(rule_id = %rule.rule_id, "starting probe loop");

            let mut ticker = interval(Duration::from_secs(rule.strategy.eval_interval.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now().timestamp();
                        let probe = AssertUnwindSafe(self.probe_once(&rule, now)).catch_unwind();

                        tokio::select! {
                            _ = token.cancelled() => break,
                            result = probe => match result {
                                Ok(Ok(_)) => {}
                                Ok(Err(e)) => warn!(rule_id = %rule.rule_id, "probe aborted: {}", e),
                                Err(panic) => {
                                    error!(
                                        rule_id = %rule.rule_id,
                                        "probe loop panicked: {}\n{}",
                                        panic_message(panic.as_ref()),
                                        Backtrace::force_capture()
                                    );
                                    self.restart(rule);
                                    return;
                                }
                            },
                        }
                    }
                }
            }

            debug!(rule_id = %rule.rule_id, "probe loop stopped");
        }
        .boxed()
    }

    /// Probe once, record the result and evaluate it
    #[instrument(skip_all, fields(rule_id = %rule.rule_id))]
    pub async fn probe_once(&self, rule: &ProbingRule, now: i64) -> EngineResult<Transition> {
        let outcome = self.inner.probers.pilot(rule).await?;

        let row = ProbingHistoryRow {
            tenant_id: rule.tenant_id.clone(),
            rule_id: rule.rule_id.clone(),
            timestamp: DateTime::from_timestamp(now, 0).unwrap_or_else(Utc::now),
            values: outcome.values.clone(),
        };
        if let Err(e) = self.inner.history.insert_probing_history(row).await {
            warn!("failed to record probe result: {}", e);
        }

        self.inner.evaluator.evaluate(rule, &outcome, now).await
    }
}
