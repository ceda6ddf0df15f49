//! One supervisory loop per fault center
//!
//! ```text
//! 1s tick → promote silences → fetch events → filter → group → dispatch → escalate
//!    ↑
//!    └─── submit / stop / restart
//! ```
//!
//! Each tick recomputes everything from the cache, so a tick that is
//! abandoned (cancellation, cache outage, panic) loses nothing.

use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::cache::Cache;
use crate::error::EngineResult;
use crate::escalation::EscalationTracker;
use crate::grouping::EventGrouper;
use crate::models::{AlertEvent, AlertStatus, FaultCenter};
use crate::notify::NotificationDispatcher;
use crate::recovery::RecoveryWaitStore;
use crate::silence::promote_silences;
use crate::store::{ConfigStore, HistoryBackend, HistoryEventRow};

use super::registry::TaskRegistry;

/// Events kept and archived by the filter step
#[derive(Debug, Default)]
pub struct FilterOutcome {
    /// Events that go on to grouping and dispatch
    pub kept: Vec<AlertEvent>,

    /// Finished recoveries to move from the cache into history
    pub archive: Vec<AlertEvent>,
}

struct Inner {
    cache: Cache,
    store: Arc<dyn ConfigStore>,
    history: Arc<dyn HistoryBackend>,
    dispatcher: Arc<NotificationDispatcher>,
    escalation: EscalationTracker,
    registry: TaskRegistry,

    /// First time each held recovery was seen, by rule and fingerprint
    recovery_wait: RecoveryWaitStore<i64>,
}

#[derive(Clone)]
pub struct FaultCenterSupervisor {
    inner: Arc<Inner>,
    tick_interval: Duration,
}

impl FaultCenterSupervisor {
    pub fn new(
        cache: Cache,
        store: Arc<dyn ConfigStore>,
        history: Arc<dyn HistoryBackend>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        let escalation = EscalationTracker::new(cache.clone(), dispatcher.clone());
        Self {
            inner: Arc::new(Inner {
                cache,
                store,
                history,
                dispatcher,
                escalation,
                registry: TaskRegistry::new(),
                recovery_wait: RecoveryWaitStore::new(),
            }),
            tick_interval: Duration::from_secs(1),
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    fn task_id(tenant_id: &str, id: &str) -> String {
        format!("{tenant_id}/{id}")
    }

    /// Publish the fault center and start its loop
    ///
    /// A loop already running for the same fault center is replaced.
    #[instrument(skip_all, fields(fault_center = %center.display()))]
    pub async fn submit(&self, center: FaultCenter) -> EngineResult<()> {
        self.inner.cache.push_fault_center(&center).await?;
        self.spawn_loop(center);
        Ok(())
    }

    pub fn stop(&self, tenant_id: &str, id: &str) -> bool {
        let stopped = self.inner.registry.cancel(&Self::task_id(tenant_id, id));
        if stopped {
            debug!("stopped fault center {}/{}", tenant_id, id);
        }
        stopped
    }

    pub async fn restart(&self, center: FaultCenter) -> EngineResult<()> {
        self.stop(&center.tenant_id, &center.id);
        self.submit(center).await
    }

    /// Submit every persisted fault center; returns how many were started
    pub async fn restart_all_consumers(&self) -> EngineResult<usize> {
        let centers = self.inner.store.list_fault_centers().await?;
        let count = centers.len();
        for center in centers {
            self.restart(center).await?;
        }
        info!("started {} fault center supervisor(s)", count);
        Ok(count)
    }

    pub fn is_running(&self, tenant_id: &str, id: &str) -> bool {
        self.inner.registry.contains(&Self::task_id(tenant_id, id))
    }

    pub fn running(&self) -> Vec<String> {
        self.inner.registry.ids()
    }

    pub fn stop_all(&self) {
        self.inner.registry.cancel_all();
    }

    fn spawn_loop(&self, center: FaultCenter) {
        let token = self
            .inner
            .registry
            .register(&Self::task_id(&center.tenant_id, &center.id));
        tokio::spawn(self.clone().run(center, token));
    }

    fn run(self, center: FaultCenter, token: CancellationToken) -> BoxFuture<'static, ()> {
        async move {
            debug!(fault_center = %center.display(), "starting fault center supervisor");

            let mut ticker = interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now().timestamp();
                        let tick = AssertUnwindSafe(self.run_tick(&center, now)).catch_unwind();

                        tokio::select! {
                            _ = token.cancelled() => break,
                            result = tick => match result {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => warn!(fault_center = %center.id, "tick aborted: {}", e),
                                Err(panic) => {
                                    error!(
                                        fault_center = %center.id,
                                        "supervisor panicked: {}\n{}",
                                        panic_message(panic.as_ref()),
                                        Backtrace::force_capture()
                                    );
                                    self.stop(&center.tenant_id, &center.id);
                                    self.spawn_loop(center);
                                    return;
                                }
                            },
                        }
                    }
                }
            }

            debug!(fault_center = %center.display(), "fault center supervisor stopped");
        }
        .boxed()
    }

    /// One pass over the fault center's events
    ///
    /// The fault center is re-read from the cache so updates apply without a
    /// restart; `fallback` is used when the cache has no copy.
    #[instrument(skip_all, fields(fault_center = %fallback.id))]
    pub async fn run_tick(&self, fallback: &FaultCenter, now: i64) -> EngineResult<()> {
        let cache = &self.inner.cache;
        let center = cache
            .get_fault_center(&fallback.tenant_id, &fallback.id)
            .await?
            .unwrap_or_else(|| fallback.clone());

        let mut silences = cache.list_silences(&center.tenant_id, &center.id).await?;
        for rule in promote_silences(&mut silences, now) {
            self.inner.store.save_silence(&rule).await?;
            cache.push_silence(&rule).await?;
        }

        let mut events = cache.list_events(&center.tenant_id, &center.id).await?;
        events.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        trace!("fetched {} event(s)", events.len());

        let FilterOutcome { kept, archive } = self.filter(&center, &events, now);
        for event in &archive {
            self.archive(event, now).await?;
        }

        let recoveries: Vec<AlertEvent> = kept.iter().filter(|e| e.is_recovered).cloned().collect();
        let grouping = EventGrouper::group(&center, kept);

        let mut failed = HashSet::new();
        let mut delivered = BTreeMap::new();
        for group in grouping.groups {
            let fingerprints: Vec<String> =
                group.events.iter().map(|e| e.fingerprint.clone()).collect();
            match self
                .inner
                .dispatcher
                .handle_alert(&center, &group.notice_id, group.events, now)
                .await
            {
                Ok(events) => {
                    for event in events {
                        delivered.entry(event.fingerprint.clone()).or_insert(event);
                    }
                }
                Err(e) => {
                    error!(
                        rule = %group.rule_key,
                        notice = %group.notice_id,
                        "dispatch failed: {}", e
                    );
                    failed.extend(fingerprints);
                }
            }
        }

        // once per event, however many notice objects it was routed to
        let delivered: Vec<AlertEvent> = delivered.into_values().collect();
        self.inner.dispatcher.notify_subscribers(&delivered).await;

        for event in recoveries {
            if !failed.contains(&event.fingerprint) {
                self.finish_recovery(event, now).await?;
            }
        }

        if let Err(e) = self
            .inner
            .escalation
            .run(&center, &events, &silences, now)
            .await
        {
            warn!("escalation failed: {}", e);
        }

        Ok(())
    }

    /// Decide which fetched events are dispatched this tick
    pub fn filter(&self, center: &FaultCenter, events: &[AlertEvent], now: i64) -> FilterOutcome {
        let wait = &self.inner.recovery_wait;
        let mut outcome = FilterOutcome::default();

        for event in events {
            if event.fingerprint.is_empty() {
                trace!(rule = %event.rule_id, "dropping event without fingerprint");
                continue;
            }

            if !event.is_firing() {
                if event.is_recovered {
                    outcome.archive.push(event.clone());
                }
                continue;
            }

            if event.is_recovered {
                if center.recover_wait_time > 0 {
                    let first_seen = wait
                        .get(&event.rule_id, &event.fingerprint)
                        .unwrap_or_else(|| {
                            wait.set(&event.rule_id, &event.fingerprint, now);
                            now
                        });
                    if now < first_seen + center.recover_wait_time {
                        trace!(fingerprint = %event.fingerprint, "holding recovery");
                        continue;
                    }
                }
                outcome.kept.push(event.clone());
                continue;
            }

            wait.remove(&event.rule_id, &event.fingerprint);

            let repeat = center.repeat_notice_interval * 60;
            if event.last_send_time == 0 || event.last_eval_time >= event.last_send_time + repeat {
                outcome.kept.push(event.clone());
            }
        }

        outcome
    }

    async fn archive(&self, event: &AlertEvent, now: i64) -> EngineResult<()> {
        let archived_at = DateTime::from_timestamp(now, 0).unwrap_or_else(Utc::now);
        self.inner
            .history
            .insert_history_event(HistoryEventRow::from_event(event, archived_at))
            .await?;
        self.inner
            .cache
            .remove_event(&event.tenant_id, &event.fault_center_id, &event.fingerprint)
            .await?;
        self.inner
            .recovery_wait
            .remove(&event.rule_id, &event.fingerprint);

        debug!(fingerprint = %event.fingerprint, "recovered event archived");
        Ok(())
    }

    /// Mark a processed recovery as final; the next tick archives it
    async fn finish_recovery(&self, mut event: AlertEvent, now: i64) -> EngineResult<()> {
        event.status = AlertStatus::Recovered;
        if event.recover_time == 0 {
            event.recover_time = now;
        }
        self.inner.cache.push_event(&event).await?;
        Ok(())
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
