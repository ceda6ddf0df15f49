//! Failure handling
//!
//! These tests verify that the engine degrades the way it is meant to:
//! - Send failures are isolated and recorded, never retried in the same tick
//! - Malformed events are dropped
//! - Missing configuration aborts the affected group only
//! - Panicking supervisors and probes restart their loop

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alerting_engine::cache::{Cache, CacheBackend, MemoryBackend, events_key};
use alerting_engine::models::{
    AlertStatus, ChannelRoute, EmailFields, NoticeKind, ProbeProtocol, ProbingRule, Severity,
};
use alerting_engine::probing::{ProbeError, ProbeOutcome, Prober, ProberRegistry};
use alerting_engine::senders::{SendError, SendParams, Sender};
use alerting_engine::store::{ConfigStore, HistoryBackend, NoticeOutcome};
use async_trait::async_trait;

use crate::helpers::*;

const NOW: i64 = 1_700_000_000;

#[tokio::test]
async fn failed_sends_are_recorded_and_retried_next_interval() {
    let harness = Harness::with_sender(RecordingSender::failing());
    let mut center = fault_center();
    center.repeat_notice_interval = 5;
    harness.setup(&center).await;
    harness.push(&[firing_event("a", Severity::P1, NOW)]).await;

    let supervisor = harness.engine.fault_centers();
    supervisor.run_tick(&center, NOW).await.unwrap();

    let records = harness.history.query_notice_records(TENANT, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, NoticeOutcome::Failed);
    assert!(records[0].error.as_deref().unwrap_or_default().contains("told to fail"));

    // no immediate retry
    supervisor.run_tick(&center, NOW + 1).await.unwrap();
    assert_eq!(harness.sender.count(), 1);
    assert_eq!(harness.cached("a").await.unwrap().last_send_time, NOW);
}

#[tokio::test]
async fn one_failing_route_does_not_block_the_others() {
    let harness = Harness::new();
    let center = fault_center();
    harness.setup(&center).await;

    let mut notice = hook_notice(NOTICE);
    notice.routes.insert(
        0,
        ChannelRoute {
            kind: NoticeKind::PhoneCall,
            template_id: String::new(),
            severities: vec![Severity::P1],
            hook: String::new(),
            sign: String::new(),
            email: EmailFields::default(),
        },
    );
    harness.store.upsert_notice(notice).await.unwrap();
    harness.push(&[firing_event("a", Severity::P1, NOW)]).await;

    harness
        .engine
        .fault_centers()
        .run_tick(&center, NOW)
        .await
        .unwrap();

    assert_eq!(harness.sender.count(), 1);

    let mut outcomes: Vec<_> = harness
        .history
        .query_notice_records(TENANT, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.notice_kind, r.outcome))
        .collect();
    outcomes.sort_by_key(|(kind, _)| kind.to_string());
    assert_eq!(
        outcomes,
        vec![
            (NoticeKind::CustomHook, NoticeOutcome::Success),
            (NoticeKind::PhoneCall, NoticeOutcome::Failed),
        ]
    );
}

#[tokio::test]
async fn events_without_fingerprint_are_dropped() {
    let harness = Harness::new();
    let center = fault_center();
    harness.setup(&center).await;
    harness.push(&[firing_event("", Severity::P1, NOW)]).await;

    harness
        .engine
        .fault_centers()
        .run_tick(&center, NOW)
        .await
        .unwrap();

    assert_eq!(harness.sender.count(), 0);
}

#[tokio::test]
async fn malformed_cache_entries_are_skipped() {
    let backend = Arc::new(MemoryBackend::new());
    let cache = Cache::new(backend.clone());

    cache
        .push_event(&firing_event("a", Severity::P1, NOW))
        .await
        .unwrap();
    backend
        .hash_set(&events_key(TENANT, FAULT_CENTER), "b", "{ not an event".to_string())
        .await
        .unwrap();

    let events = cache.list_events(TENANT, FAULT_CENTER).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].fingerprint, "a");
}

#[tokio::test]
async fn missing_notice_keeps_the_recovery_pending() {
    let harness = Harness::new();
    let mut center = fault_center();
    center.notice_ids = vec!["n-missing".to_string()];
    harness.setup(&center).await;

    let mut event = firing_event("a", Severity::P1, NOW - 600);
    event.is_recovered = true;
    harness.push(&[event]).await;

    let supervisor = harness.engine.fault_centers();
    supervisor.run_tick(&center, NOW).await.unwrap();

    let cached = harness.cached("a").await.unwrap();
    assert_eq!(cached.status, AlertStatus::Firing);

    // once the notice exists the recovery goes through
    harness
        .store
        .upsert_notice(hook_notice("n-missing"))
        .await
        .unwrap();
    supervisor.run_tick(&center, NOW + 1).await.unwrap();
    assert_eq!(harness.cached("a").await.unwrap().status, AlertStatus::Recovered);
}

#[tokio::test]
async fn unrouted_events_are_not_sent() {
    let harness = Harness::new();
    let mut center = fault_center();
    center.notice_ids.clear();
    harness.setup(&center).await;
    harness.push(&[firing_event("a", Severity::P1, NOW)]).await;

    harness
        .engine
        .fault_centers()
        .run_tick(&center, NOW)
        .await
        .unwrap();

    assert_eq!(harness.sender.count(), 0);
}

/// Panics on its first probe, then reports a healthy port
struct PanicOnceProber {
    calls: AtomicUsize,
}

#[async_trait]
impl Prober for PanicOnceProber {
    async fn pilot(&self, rule: &ProbingRule) -> Result<ProbeOutcome, ProbeError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("prober blew up");
        }
        Ok(ProbeOutcome::new(
            rule,
            BTreeMap::from([("IsSuccessful".to_string(), 1.0)]),
        ))
    }
}

#[tokio::test]
async fn panicking_probe_loop_restarts() {
    let prober = Arc::new(PanicOnceProber {
        calls: AtomicUsize::new(0),
    });
    let harness =
        Harness::with_probers(ProberRegistry::new().with(ProbeProtocol::Tcp, prober.clone()));

    harness.engine.probing().submit(tcp_rule(1));

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.history.probing_history(TENANT, "p-1").is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("the probe loop did not come back after the panic");

    assert!(prober.calls.load(Ordering::SeqCst) >= 2);
    assert!(harness.engine.probing().is_running(TENANT, "p-1"));
    harness.engine.probing().stop_all();
}

/// Panics on its first send, then records the delivered fingerprints
#[derive(Default)]
struct PanicOnceSender {
    calls: AtomicUsize,
    delivered: Mutex<Vec<String>>,
}

impl PanicOnceSender {
    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sender for PanicOnceSender {
    async fn send(&self, params: &SendParams) -> Result<(), SendError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("sender blew up");
        }
        self.delivered.lock().unwrap().push(params.event_id.clone());
        Ok(())
    }

    async fn test(&self, params: &SendParams) -> Result<(), SendError> {
        self.send(params).await
    }
}

#[tokio::test]
async fn panicking_fault_center_loop_restarts() {
    let sender = Arc::new(PanicOnceSender::default());
    let harness = Harness::with_hook_sender(sender.clone());
    let center = fault_center();
    harness.setup(&center).await;
    harness.push(&[firing_event("a", Severity::P1, NOW)]).await;

    let supervisor = harness.engine.fault_centers();
    supervisor.submit(center).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while sender.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("the supervisor never dispatched");

    // the restarted loop keeps delivering new events
    harness.push(&[firing_event("b", Severity::P1, NOW)]).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while !sender.delivered().contains(&"b".to_string()) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("the supervisor did not come back after the panic");

    assert!(supervisor.is_running(TENANT, FAULT_CENTER));
    supervisor.stop_all();
}
