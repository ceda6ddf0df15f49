//! End-to-end ticks of the fault center supervisor
//!
//! Each test drives `run_tick` with an explicit clock, so nothing depends on
//! wall time except the loop lifecycle test at the bottom.

use std::time::Duration;

use alerting_engine::models::{
    AggregationType, AlertStatus, LabelMatcher, MatchOperator, NoticeKind, NoticeRoute, Severity,
    SilenceRule, SilenceStatus, Subscription, UpgradeStrategy,
};
use alerting_engine::store::{ConfigStore, HistoryBackend, NoticeOutcome};
use pretty_assertions::assert_eq;

use crate::helpers::*;

const NOW: i64 = 1_700_000_000;

#[tokio::test]
async fn repeat_interval_gates_renotification() {
    let harness = Harness::new();
    let mut center = fault_center();
    center.repeat_notice_interval = 5;
    harness.setup(&center).await;
    harness.push(&[firing_event("a", Severity::P1, NOW)]).await;

    let supervisor = harness.engine.fault_centers();
    supervisor.run_tick(&center, NOW).await.unwrap();
    assert_eq!(harness.sender.count(), 1);
    assert_eq!(harness.cached("a").await.unwrap().last_send_time, NOW);

    // evaluated again inside the interval
    let mut event = harness.cached("a").await.unwrap();
    event.last_eval_time = NOW + 60;
    harness.push(&[event]).await;
    supervisor.run_tick(&center, NOW + 60).await.unwrap();
    assert_eq!(harness.sender.count(), 1);

    // evaluated once the interval elapsed
    let mut event = harness.cached("a").await.unwrap();
    event.last_eval_time = NOW + 300;
    harness.push(&[event]).await;
    supervisor.run_tick(&center, NOW + 300).await.unwrap();
    assert_eq!(harness.sender.count(), 2);
}

#[tokio::test]
async fn rule_aggregation_sends_one_and_refreshes_all() {
    let harness = Harness::new();
    let mut center = fault_center();
    center.aggregation_type = AggregationType::Rule;
    harness.setup(&center).await;
    harness
        .push(&[
            firing_event("a", Severity::P1, NOW),
            firing_event("b", Severity::P1, NOW),
            firing_event("c", Severity::P1, NOW),
        ])
        .await;

    harness
        .engine
        .fault_centers()
        .run_tick(&center, NOW)
        .await
        .unwrap();

    let sent = harness.sender.events();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].annotations.ends_with("[collapsed 3 alerts]"));

    for fingerprint in ["a", "b", "c"] {
        assert_eq!(harness.cached(fingerprint).await.unwrap().last_send_time, NOW);
    }
}

#[tokio::test]
async fn severities_are_sent_separately() {
    let harness = Harness::new();
    let mut center = fault_center();
    center.aggregation_type = AggregationType::Rule;
    harness.setup(&center).await;
    harness
        .push(&[
            firing_event("a", Severity::P0, NOW),
            firing_event("b", Severity::P1, NOW),
        ])
        .await;

    harness
        .engine
        .fault_centers()
        .run_tick(&center, NOW)
        .await
        .unwrap();

    let mut severities: Vec<_> = harness.sender.sent().iter().map(|p| p.severity).collect();
    severities.sort();
    assert_eq!(severities, vec![Severity::P0, Severity::P1]);
}

#[tokio::test]
async fn silenced_events_are_never_sent() {
    let harness = Harness::new();
    let center = fault_center();
    harness.setup(&center).await;

    let silence = SilenceRule {
        tenant_id: TENANT.to_string(),
        fault_center_id: FAULT_CENTER.to_string(),
        id: "s-1".to_string(),
        labels: vec![LabelMatcher {
            key: "env".to_string(),
            operator: MatchOperator::Equal,
            value: "prod".to_string(),
        }],
        starts_at: NOW - 60,
        ends_at: NOW + 3600,
        status: SilenceStatus::Pending,
        comment: "maintenance".to_string(),
    };
    harness.cache.push_silence(&silence).await.unwrap();

    let mut staging = firing_event("b", Severity::P1, NOW);
    staging.labels.insert("env".to_string(), "staging".into());
    harness
        .push(&[firing_event("a", Severity::P1, NOW), staging])
        .await;

    harness
        .engine
        .fault_centers()
        .run_tick(&center, NOW)
        .await
        .unwrap();

    let sent: Vec<_> = harness
        .sender
        .events()
        .into_iter()
        .map(|e| e.fingerprint)
        .collect();
    assert_eq!(sent, vec!["b".to_string()]);

    // the pending silence was promoted and persisted
    let stored = harness.store.list_silences(TENANT, FAULT_CENTER).await.unwrap();
    assert_eq!(stored[0].status, SilenceStatus::Active);
}

#[tokio::test]
async fn muted_events_are_left_out_of_the_collapsed_count() {
    let harness = Harness::new();
    let mut center = fault_center();
    center.aggregation_type = AggregationType::Rule;
    harness.setup(&center).await;

    let silence = SilenceRule {
        tenant_id: TENANT.to_string(),
        fault_center_id: FAULT_CENTER.to_string(),
        id: "s-1".to_string(),
        labels: vec![LabelMatcher {
            key: "instance".to_string(),
            operator: MatchOperator::Equal,
            value: "a".to_string(),
        }],
        starts_at: NOW - 60,
        ends_at: NOW + 3600,
        status: SilenceStatus::Active,
        comment: String::new(),
    };
    harness.cache.push_silence(&silence).await.unwrap();
    harness
        .push(&[
            firing_event("a", Severity::P1, NOW),
            firing_event("b", Severity::P1, NOW),
            firing_event("c", Severity::P1, NOW),
        ])
        .await;

    harness
        .engine
        .fault_centers()
        .run_tick(&center, NOW)
        .await
        .unwrap();

    let sent = harness.sender.events();
    assert_eq!(sent.len(), 1);
    assert_ne!(sent[0].fingerprint, "a");
    assert!(sent[0].annotations.ends_with("[collapsed 2 alerts]"));
}

#[tokio::test]
async fn label_routes_pick_the_notice() {
    let harness = Harness::new();
    let mut center = fault_center();
    center.notice_routes = vec![NoticeRoute {
        key: "env".to_string(),
        value: "^stag".to_string(),
        notice_ids: vec!["n-staging".to_string()],
    }];
    harness.setup(&center).await;
    harness
        .store
        .upsert_notice(hook_notice("n-staging"))
        .await
        .unwrap();

    let mut staging = firing_event("b", Severity::P1, NOW);
    staging.labels.insert("env".to_string(), "staging".into());
    harness
        .push(&[firing_event("a", Severity::P1, NOW), staging])
        .await;

    harness
        .engine
        .fault_centers()
        .run_tick(&center, NOW)
        .await
        .unwrap();

    let mut routed: Vec<_> = harness
        .sender
        .sent()
        .into_iter()
        .map(|p| (p.event_id, p.notice_id))
        .collect();
    routed.sort();
    assert_eq!(
        routed,
        vec![
            ("a".to_string(), NOTICE.to_string()),
            ("b".to_string(), "n-staging".to_string()),
        ]
    );
}

#[tokio::test]
async fn subscribers_are_emailed_once_per_event() {
    let harness = Harness::new();
    let mut center = fault_center();
    center.notice_ids = vec![NOTICE.to_string(), "n-2".to_string()];
    harness.setup(&center).await;
    harness.store.upsert_notice(hook_notice("n-2")).await.unwrap();
    harness
        .store
        .upsert_subscription(Subscription {
            tenant_id: TENANT.to_string(),
            id: "sub-1".to_string(),
            user_id: "u-1".to_string(),
            email: "oncall@example.com".to_string(),
            rule_id: "r-1".to_string(),
            severities: vec![Severity::P1],
            filters: Vec::new(),
        })
        .await
        .unwrap();
    harness.push(&[firing_event("a", Severity::P1, NOW)]).await;

    harness
        .engine
        .fault_centers()
        .run_tick(&center, NOW)
        .await
        .unwrap();

    let sent = harness.sender.sent();
    let mut hooks: Vec<_> = sent
        .iter()
        .filter(|p| p.notice_kind == NoticeKind::CustomHook)
        .map(|p| p.notice_id.clone())
        .collect();
    hooks.sort();
    assert_eq!(hooks, vec![NOTICE.to_string(), "n-2".to_string()]);

    let emails: Vec<_> = sent
        .iter()
        .filter(|p| p.notice_kind == NoticeKind::Email)
        .collect();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].email.to, vec!["oncall@example.com".to_string()]);
}

#[tokio::test]
async fn recovery_is_notified_then_archived() {
    let harness = Harness::new();
    let center = fault_center();
    harness.setup(&center).await;

    let mut event = firing_event("a", Severity::P1, NOW - 600);
    event.last_send_time = NOW - 600;
    event.is_recovered = true;
    harness.push(&[event]).await;

    let supervisor = harness.engine.fault_centers();
    supervisor.run_tick(&center, NOW).await.unwrap();

    let sent = harness.sender.events();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_recovered);
    let cached = harness.cached("a").await.unwrap();
    assert_eq!(cached.status, AlertStatus::Recovered);
    assert_eq!(cached.recover_time, NOW);

    supervisor.run_tick(&center, NOW + 1).await.unwrap();
    assert!(harness.cached("a").await.is_none());
    assert_eq!(harness.sender.count(), 1);

    let archived = harness
        .history
        .query_history_events(TENANT, FAULT_CENTER)
        .await
        .unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].fingerprint, "a");
    assert_eq!(archived[0].recover_time, NOW);
}

#[tokio::test]
async fn recovered_events_in_any_non_firing_state_are_archived() {
    let harness = Harness::new();
    let center = fault_center();
    harness.setup(&center).await;

    let mut events = Vec::new();
    for (fingerprint, status) in [
        ("pending", AlertStatus::PendingRecovery),
        ("silenced", AlertStatus::Silenced),
        ("pre", AlertStatus::PreAlert),
    ] {
        let mut event = firing_event(fingerprint, Severity::P1, NOW - 600);
        event.status = status;
        event.is_recovered = true;
        events.push(event);
    }
    let mut still_pending = firing_event("kept", Severity::P1, NOW - 600);
    still_pending.status = AlertStatus::PendingRecovery;
    events.push(still_pending);
    harness.push(&events).await;

    harness
        .engine
        .fault_centers()
        .run_tick(&center, NOW)
        .await
        .unwrap();

    for fingerprint in ["pending", "silenced", "pre"] {
        assert!(harness.cached(fingerprint).await.is_none(), "{fingerprint} still cached");
    }
    assert!(harness.cached("kept").await.is_some());
    assert_eq!(harness.sender.count(), 0);

    let mut archived: Vec<_> = harness
        .history
        .query_history_events(TENANT, FAULT_CENTER)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.fingerprint)
        .collect();
    archived.sort();
    assert_eq!(archived, vec!["pending", "pre", "silenced"]);
}

#[tokio::test]
async fn recovery_is_held_for_the_wait_time() {
    let harness = Harness::new();
    let mut center = fault_center();
    center.recover_wait_time = 60;
    harness.setup(&center).await;

    let mut event = firing_event("a", Severity::P1, NOW - 600);
    event.last_send_time = NOW - 600;
    event.is_recovered = true;
    harness.push(&[event]).await;

    let supervisor = harness.engine.fault_centers();
    supervisor.run_tick(&center, NOW).await.unwrap();
    supervisor.run_tick(&center, NOW + 30).await.unwrap();
    assert_eq!(harness.sender.count(), 0);

    supervisor.run_tick(&center, NOW + 60).await.unwrap();
    assert_eq!(harness.sender.count(), 1);
}

#[tokio::test]
async fn recovery_without_notify_is_archived_silently() {
    let harness = Harness::new();
    let mut center = fault_center();
    center.recover_notify = false;
    harness.setup(&center).await;

    let mut event = firing_event("a", Severity::P1, NOW - 600);
    event.is_recovered = true;
    harness.push(&[event]).await;

    let supervisor = harness.engine.fault_centers();
    supervisor.run_tick(&center, NOW).await.unwrap();
    supervisor.run_tick(&center, NOW + 1).await.unwrap();

    assert_eq!(harness.sender.count(), 0);
    assert!(harness.cached("a").await.is_none());
}

#[tokio::test]
async fn unacknowledged_alerts_escalate_at_the_repeat_interval() {
    let harness = Harness::new();
    let mut center = fault_center();
    center.repeat_notice_interval = 60;
    center.upgradable_severity = vec![Severity::P0];
    center.upgrade_strategy = UpgradeStrategy {
        enabled: true,
        timeout: 10,
        repeat_interval: 5,
        notice_id: "n-escalation".to_string(),
    };
    harness.setup(&center).await;
    harness
        .store
        .upsert_notice(hook_notice("n-escalation"))
        .await
        .unwrap();

    let mut event = firing_event("a", Severity::P0, NOW - 11 * 60);
    event.last_eval_time = NOW;
    harness.push(&[event]).await;

    let escalations = |harness: &Harness| {
        harness
            .sender
            .sent()
            .iter()
            .filter(|p| p.notice_id == "n-escalation")
            .count()
    };

    let supervisor = harness.engine.fault_centers();
    supervisor.run_tick(&center, NOW).await.unwrap();
    assert_eq!(escalations(&harness), 1);
    assert_eq!(
        harness.cached("a").await.unwrap().confirm_state.timeout_send_time,
        NOW
    );

    supervisor.run_tick(&center, NOW + 3 * 60).await.unwrap();
    assert_eq!(escalations(&harness), 1);

    supervisor.run_tick(&center, NOW + 6 * 60).await.unwrap();
    assert_eq!(escalations(&harness), 2);

    // acknowledged alerts stop escalating
    let mut event = harness.cached("a").await.unwrap();
    event.confirm_state.is_ok = true;
    harness.push(&[event]).await;
    supervisor.run_tick(&center, NOW + 20 * 60).await.unwrap();
    assert_eq!(escalations(&harness), 2);
}

#[tokio::test]
async fn every_delivery_is_recorded() {
    let harness = Harness::new();
    let center = fault_center();
    harness.setup(&center).await;
    harness.push(&[firing_event("a", Severity::P2, NOW)]).await;

    harness
        .engine
        .fault_centers()
        .run_tick(&center, NOW)
        .await
        .unwrap();

    let records = harness.history.query_notice_records(TENANT, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, NoticeOutcome::Success);
    assert_eq!(records[0].event_id, "a");
}

#[tokio::test]
async fn supervisor_loop_runs_until_stopped() {
    let harness = Harness::new();
    let center = fault_center();
    harness.setup(&center).await;
    harness
        .push(&[firing_event("a", Severity::P1, chrono::Utc::now().timestamp())])
        .await;

    let supervisor = harness.engine.fault_centers();
    supervisor.submit(center.clone()).await.unwrap();
    assert!(supervisor.is_running(TENANT, FAULT_CENTER));

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.sender.count() == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("the supervisor never dispatched");

    assert!(supervisor.stop(TENANT, FAULT_CENTER));
    assert!(!supervisor.is_running(TENANT, FAULT_CENTER));
    assert!(!supervisor.stop(TENANT, FAULT_CENTER));
}
