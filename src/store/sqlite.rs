//! SQLite history backend
//!
//! Keeps the archive of recovered events, probe results and the notification
//! ledger in a local database file.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Reads are not blocked by the supervisors' writes
//! - **Migrations**: Schema versioning with sqlx (`migrations/`)

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, HistoryBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{HistoryEventRow, NoticeRecord, ProbingHistoryRow};

pub struct SqliteHistory {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteHistory {
    /// Open (or create) the database at `db_path` and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite history at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }
}

/// Decode an enum stored under its serde name
fn parse_enum<T: DeserializeOwned>(value: String) -> StorageResult<T> {
    serde_json::from_value(serde_json::Value::String(value)).map_err(StorageError::from)
}

#[async_trait]
impl HistoryBackend for SqliteHistory {
    #[instrument(skip_all, fields(fingerprint = %row.fingerprint))]
    async fn insert_history_event(&self, row: HistoryEventRow) -> StorageResult<()> {
        let labels = serde_json::to_string(&row.labels)?;

        sqlx::query(
            r#"
            INSERT INTO history_events (
                tenant_id, fault_center_id, rule_id, rule_name, fingerprint,
                severity, labels, annotations, first_trigger_time,
                last_eval_time, last_send_time, recover_time, archived_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.tenant_id)
        .bind(&row.fault_center_id)
        .bind(&row.rule_id)
        .bind(&row.rule_name)
        .bind(&row.fingerprint)
        .bind(row.severity.to_string())
        .bind(labels)
        .bind(&row.annotations)
        .bind(row.first_trigger_time)
        .bind(row.last_eval_time)
        .bind(row.last_send_time)
        .bind(row.recover_time)
        .bind(row.archived_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(rule_id = %row.rule_id))]
    async fn insert_probing_history(&self, row: ProbingHistoryRow) -> StorageResult<()> {
        let values = serde_json::to_string(&row.values)?;

        sqlx::query(
            "INSERT INTO probing_history (tenant_id, rule_id, timestamp, vals) VALUES (?, ?, ?, ?)",
        )
        .bind(&row.tenant_id)
        .bind(&row.rule_id)
        .bind(row.timestamp.timestamp_millis())
        .bind(values)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(event_id = %record.event_id, kind = %record.notice_kind))]
    async fn insert_notice_record(&self, record: NoticeRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notice_records (
                tenant_id, event_id, rule_name, severity, notice_kind, notice_id,
                notice_name, is_recovered, outcome, content, error, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.tenant_id)
        .bind(&record.event_id)
        .bind(&record.rule_name)
        .bind(record.severity.to_string())
        .bind(record.notice_kind.to_string())
        .bind(&record.notice_id)
        .bind(&record.notice_name)
        .bind(record.is_recovered)
        .bind(record.outcome.as_str())
        .bind(&record.content)
        .bind(&record.error)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_history_events(
        &self,
        tenant_id: &str,
        fault_center_id: &str,
    ) -> StorageResult<Vec<HistoryEventRow>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, fault_center_id, rule_id, rule_name, fingerprint,
                   severity, labels, annotations, first_trigger_time,
                   last_eval_time, last_send_time, recover_time, archived_at
            FROM history_events
            WHERE tenant_id = ? AND fault_center_id = ?
            ORDER BY archived_at ASC, id ASC
            "#,
        )
        .bind(tenant_id)
        .bind(fault_center_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let labels: String = row.get("labels");
                Ok(HistoryEventRow {
                    tenant_id: row.get("tenant_id"),
                    fault_center_id: row.get("fault_center_id"),
                    rule_id: row.get("rule_id"),
                    rule_name: row.get("rule_name"),
                    fingerprint: row.get("fingerprint"),
                    severity: parse_enum(row.get("severity"))?,
                    labels: serde_json::from_str(&labels)?,
                    annotations: row.get("annotations"),
                    first_trigger_time: row.get("first_trigger_time"),
                    last_eval_time: row.get("last_eval_time"),
                    last_send_time: row.get("last_send_time"),
                    recover_time: row.get("recover_time"),
                    archived_at: Self::millis_to_timestamp(row.get("archived_at")),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn query_notice_records(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<NoticeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, event_id, rule_name, severity, notice_kind, notice_id,
                   notice_name, is_recovered, outcome, content, error, created_at
            FROM notice_records
            WHERE tenant_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(tenant_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(NoticeRecord {
                    tenant_id: row.get("tenant_id"),
                    event_id: row.get("event_id"),
                    rule_name: row.get("rule_name"),
                    severity: parse_enum(row.get("severity"))?,
                    notice_kind: parse_enum(row.get("notice_kind"))?,
                    notice_id: row.get("notice_id"),
                    notice_name: row.get("notice_name"),
                    is_recovered: row.get("is_recovered"),
                    outcome: parse_enum(row.get("outcome"))?,
                    content: row.get("content"),
                    error: row.get("error"),
                    created_at: Self::millis_to_timestamp(row.get("created_at")),
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let before_millis = before.timestamp_millis();

        info!("cleaning up history older than {}", before);

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for statement in [
            "DELETE FROM history_events WHERE archived_at < ?",
            "DELETE FROM probing_history WHERE timestamp < ?",
            "DELETE FROM notice_records WHERE created_at < ?",
        ] {
            let result = sqlx::query(statement)
                .bind(before_millis)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected() as usize;
        }
        tx.commit().await?;

        info!("deleted {} old history rows", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite history operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite history");
        self.pool.close().await;
        Ok(())
    }
}
