//! Consumption side of probing: delivers the cached probing event of a rule

use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::cache::Cache;
use crate::error::EngineResult;
use crate::models::{ProbingEvent, ProbingRule};
use crate::notify::NotificationDispatcher;
use crate::store::ConfigStore;
use crate::supervisor::{TaskRegistry, panic_message};

/// What one consumer pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumed {
    /// No event, or a firing event still inside its repeat interval
    Idle,
    Notified,
    /// A recovered event was handled and removed from the cache
    Closed,
}

struct Inner {
    cache: Cache,
    store: Arc<dyn ConfigStore>,
    dispatcher: Arc<NotificationDispatcher>,
    registry: TaskRegistry,
}

#[derive(Clone)]
pub struct ProbingConsumer {
    inner: Arc<Inner>,
    tick_interval: Duration,
}

impl ProbingConsumer {
    pub fn new(
        cache: Cache,
        store: Arc<dyn ConfigStore>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                store,
                dispatcher,
                registry: TaskRegistry::new(),
            }),
            tick_interval: Duration::from_secs(1),
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    fn task_id(tenant_id: &str, rule_id: &str) -> String {
        format!("{tenant_id}/{rule_id}")
    }

    pub fn submit(&self, rule: ProbingRule) {
        if !rule.enabled {
            self.stop(&rule.tenant_id, &rule.rule_id);
            return;
        }
        let token = self
            .inner
            .registry
            .register(&Self::task_id(&rule.tenant_id, &rule.rule_id));
        tokio::spawn(self.clone().run(rule, token));
    }

    pub fn stop(&self, tenant_id: &str, rule_id: &str) -> bool {
        self.inner
            .registry
            .cancel(&Self::task_id(tenant_id, rule_id))
    }

    pub fn restart(&self, rule: ProbingRule) {
        self.stop(&rule.tenant_id, &rule.rule_id);
        self.submit(rule);
    }

    pub async fn start_all(&self) -> EngineResult<usize> {
        let rules = self.inner.store.list_probing_rules().await?;
        let mut started = 0;
        for rule in rules.into_iter().filter(|rule| rule.enabled) {
            self.restart(rule);
            started += 1;
        }
        info!("started {} probing consumer(s)", started);
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

    fn run(self, rule: ProbingRule, token: CancellationToken) -> BoxFuture<'static, ()> {
        async move {
            let mut ticker = interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now().timestamp();
                        let pass = AssertUnwindSafe(self.consume_once(&rule, now)).catch_unwind();

                        tokio::select! {
                            _ = token.cancelled() => break,
                            result = pass => match result {
                                Ok(Ok(_)) => {}
                                Ok(Err(e)) => warn!(rule_id = %rule.rule_id, "delivery aborted: {}", e),
                                Err(panic) => {
                                    error!(
                                        rule_id = %rule.rule_id,
                                        "probing consumer panicked: {}\n{}",
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

            debug!(rule_id = %rule.rule_id, "probing consumer stopped");
        }
        .boxed()
    }

    /// Deliver the rule's cached event if it is due
    #[instrument(skip_all, fields(rule_id = %rule.rule_id))]
    pub async fn consume_once(&self, rule: &ProbingRule, now: i64) -> EngineResult<Consumed> {
        let cache = &self.inner.cache;
        let Some(cached) = cache
            .get_probing_event(&rule.tenant_id, &rule.rule_id)
            .await?
        else {
            return Ok(Consumed::Idle);
        };

        if cached.event.is_recovered {
            if rule.recover_notify {
                self.deliver(rule, &cached, now).await?;
            }
            cache
                .remove_probing_event(&rule.tenant_id, &rule.rule_id)
                .await?;
            debug!("recovered probing event closed");
            return Ok(Consumed::Closed);
        }

        let event = &cached.event;
        let repeat = rule.repeat_notice_interval * 60;
        if event.last_send_time != 0 && event.last_eval_time < event.last_send_time + repeat {
            return Ok(Consumed::Idle);
        }

        if !self.deliver(rule, &cached, now).await? {
            return Ok(Consumed::Idle);
        }

        // the producer may have refreshed the entry while we were sending
        if let Some(mut latest) = cache
            .get_probing_event(&rule.tenant_id, &rule.rule_id)
            .await?
            .filter(|latest| !latest.event.is_recovered)
        {
            latest.event.last_send_time = now;
            cache.push_probing_event(&latest).await?;
        }

        Ok(Consumed::Notified)
    }

    async fn deliver(&self, rule: &ProbingRule, cached: &ProbingEvent, now: i64) -> EngineResult<bool> {
        if rule.notice_id.is_empty() {
            trace!("rule has no notice object");
            return Ok(false);
        }

        self.inner
            .dispatcher
            .deliver_to_notice(&rule.tenant_id, &rule.notice_id, &cached.event, now)
            .await?;
        Ok(true)
    }
}
