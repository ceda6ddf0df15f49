//! Engine built from a config file with SQLite history and real senders

use alerting_engine::Engine;
use alerting_engine::config::parse_config;
use alerting_engine::models::Severity;
use alerting_engine::store::{HistoryBackend, NoticeOutcome};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

const NOW: i64 = 1_700_000_000;

async fn engine(dir: &TempDir, hook: String) -> Engine {
    let config = json!({
        "storage": {
            "backend": "sqlite",
            "path": dir.path().join("alerting.db"),
            "retention_days": 7
        },
        "seed": {
            "fault_centers": [fault_center()],
            "notices": [{
                "tenant_id": TENANT,
                "id": NOTICE,
                "name": "ops hook",
                "routes": [{ "kind": "CustomHook", "severities": ["P1"], "hook": hook }]
            }]
        }
    });

    let config = parse_config(&config.to_string()).unwrap();
    Engine::from_config(&config).await.unwrap()
}

#[tokio::test]
async fn deliveries_and_archives_land_in_sqlite() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, format!("{}/alerts", mock_server.uri())).await;
    let center = fault_center();

    engine
        .cache()
        .push_event(&firing_event("a", Severity::P1, NOW))
        .await
        .unwrap();
    engine.fault_centers().run_tick(&center, NOW).await.unwrap();

    let mut recovered = engine
        .cache()
        .get_event(TENANT, FAULT_CENTER, "a")
        .await
        .unwrap()
        .unwrap();
    recovered.is_recovered = true;
    engine.cache().push_event(&recovered).await.unwrap();

    engine.fault_centers().run_tick(&center, NOW + 60).await.unwrap();
    engine.fault_centers().run_tick(&center, NOW + 61).await.unwrap();

    let records = engine.history().query_notice_records(TENANT, 10).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.outcome == NoticeOutcome::Success));
    assert!(records[0].is_recovered);

    let archived = engine
        .history()
        .query_history_events(TENANT, FAULT_CENTER)
        .await
        .unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].recover_time, NOW + 60);

    let health = engine.history().health_check().await.unwrap();
    assert!(health.healthy);

    engine.shutdown().await;
}

#[tokio::test]
async fn unreachable_hook_is_recorded_as_failed() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, "http://127.0.0.1:9/alerts".to_string()).await;
    let center = fault_center();

    engine
        .cache()
        .push_event(&firing_event("a", Severity::P1, NOW))
        .await
        .unwrap();
    engine.fault_centers().run_tick(&center, NOW).await.unwrap();

    let records = engine.history().query_notice_records(TENANT, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, NoticeOutcome::Failed);

    engine.shutdown().await;
}
