//! SQLite backend for the work queue, run store, and event store.
//!
//! One database file is shared by every crawler, worker, and scheduler
//! process. Nothing here takes an in-process lock: each mutation is a
//! single SQL statement, and a task lease is claimed through one atomic
//! `UPDATE ... RETURNING`, so two workers can never check out the same
//! record. A claimed lease lasts [`DEFAULT_LEASE_SECS`]; after that the
//! task is visible to `dequeue` again, which is what recovers work from a
//! worker that died mid-task.
//!
//! Connecting runs the embedded migrations when the `sqlite-migrations`
//! feature is on (it is by default); turn it off when schema management
//! happens elsewhere. Timestamps are unix epoch seconds throughout, which
//! is plenty for scheduling.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rustc_hash::FxHashMap;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

use super::events::{Event, EventLevel, EventStore};
use super::queue::{LeasedTask, Task, TaskOptions, WorkQueue, DEFAULT_LEASE_SECS};
use super::runs::{RunRecord, RunStore};
use super::{Result, StoreError};
use crate::types::{CrawlerName, RunId, StageName};

/// Durable store backend over a shared sqlite connection pool.
pub struct SqliteBackend {
    pool: SqlitePool,
    lease_secs: u64,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish()
    }
}

impl SqliteBackend {
    /// Connect (or create) a sqlite database at `database_url`.
    /// Example URL: `"sqlite://spinneret.db"`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::backend(format!("invalid database url: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::backend(format!("connect error: {e}")))?;
        #[cfg(feature = "sqlite-migrations")]
        {
            if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                return Err(StoreError::backend(format!("migration failure: {e}")));
            }
        }
        Ok(Self {
            pool,
            lease_secs: DEFAULT_LEASE_SECS,
        })
    }

    /// Override the lease visibility timeout (seconds).
    #[must_use]
    pub fn with_lease_timeout(mut self, lease_secs: u64) -> Self {
        self.lease_secs = lease_secs;
        self
    }
}

fn epoch(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn sqlx_err(e: sqlx::Error) -> StoreError {
    StoreError::backend(e.to_string())
}

fn decode_task(row: &SqliteRow) -> Result<LeasedTask> {
    let state_json: String = row.try_get("state_json").map_err(sqlx_err)?;
    let state: FxHashMap<String, Value> = serde_json::from_str(&state_json)?;
    Ok(LeasedTask {
        lease: row.try_get("lease").map_err(sqlx_err)?,
        task: Task {
            crawler: CrawlerName::new(row.try_get::<String, _>("crawler").map_err(sqlx_err)?),
            run_id: RunId::new(row.try_get::<String, _>("run_id").map_err(sqlx_err)?),
            stage: StageName::new(row.try_get::<String, _>("stage").map_err(sqlx_err)?),
            state,
        },
    })
}

fn decode_run(row: &SqliteRow) -> Result<RunRecord> {
    Ok(RunRecord {
        run_id: RunId::new(row.try_get::<String, _>("run_id").map_err(sqlx_err)?),
        crawler: CrawlerName::new(row.try_get::<String, _>("crawler").map_err(sqlx_err)?),
        started_at: from_epoch(row.try_get("started_at").map_err(sqlx_err)?),
        ended_at: row
            .try_get::<Option<i64>, _>("ended_at")
            .map_err(sqlx_err)?
            .map(from_epoch),
        operations: row.try_get::<i64, _>("operations").map_err(sqlx_err)? as u64,
        aborted: row.try_get::<i64, _>("aborted").map_err(sqlx_err)? != 0,
    })
}

fn decode_event(row: &SqliteRow) -> Result<Event> {
    let level: String = row.try_get("level").map_err(sqlx_err)?;
    let payload: Option<String> = row.try_get("payload").map_err(sqlx_err)?;
    Ok(Event {
        crawler: CrawlerName::new(row.try_get::<String, _>("crawler").map_err(sqlx_err)?),
        run_id: RunId::new(row.try_get::<String, _>("run_id").map_err(sqlx_err)?),
        stage: row
            .try_get::<Option<String>, _>("stage")
            .map_err(sqlx_err)?
            .map(StageName::new),
        level: level.parse::<EventLevel>().unwrap_or(EventLevel::Info),
        message: row.try_get("message").map_err(sqlx_err)?,
        payload: payload.map(|p| serde_json::from_str(&p)).transpose()?,
        at: from_epoch(row.try_get("at").map_err(sqlx_err)?),
    })
}

#[async_trait]
impl WorkQueue for SqliteBackend {
    #[instrument(skip(self, task, options), fields(crawler = %task.crawler, stage = %task.stage), err)]
    async fn enqueue(&self, task: Task, options: TaskOptions) -> Result<()> {
        let now = Utc::now();
        let state_json = serde_json::to_string(&task.state)?;
        sqlx::query(
            r#"
            INSERT INTO queue (crawler, run_id, stage, state_json, not_before, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(task.crawler.as_str())
        .bind(task.run_id.as_str())
        .bind(task.stage.as_str())
        .bind(state_json)
        .bind(epoch(options.not_before(now)))
        .bind(options.expires_at(now).map(epoch))
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn dequeue(&self) -> Result<Option<LeasedTask>> {
        let now = epoch(Utc::now());
        // Discard stale unclaimed tasks before leasing.
        sqlx::query(
            r#"
            DELETE FROM queue
            WHERE (leased_until IS NULL OR leased_until <= ?1)
              AND expires_at IS NOT NULL AND expires_at <= ?1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        let row = sqlx::query(
            r#"
            UPDATE queue SET leased_until = ?2
            WHERE lease = (
                SELECT lease FROM queue
                WHERE (leased_until IS NULL OR leased_until <= ?1)
                  AND not_before <= ?1
                ORDER BY lease
                LIMIT 1
            )
            RETURNING lease, crawler, run_id, stage, state_json
            "#,
        )
        .bind(now)
        .bind(now + self.lease_secs as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        row.as_ref().map(decode_task).transpose()
    }

    #[instrument(skip(self, leased), fields(lease = leased.lease), err)]
    async fn complete(&self, leased: &LeasedTask) -> Result<()> {
        sqlx::query("DELETE FROM queue WHERE lease = ?1")
            .bind(leased.lease)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn is_pending(&self, crawler: &CrawlerName) -> Result<bool> {
        let now = epoch(Utc::now());
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM queue
            WHERE crawler = ?1
              AND (leased_until > ?2 OR expires_at IS NULL OR expires_at > ?2)
            "#,
        )
        .bind(crawler.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_err)?;
        let n: i64 = row.try_get("n").map_err(sqlx_err)?;
        Ok(n > 0)
    }

    #[instrument(skip(self), fields(crawler = %crawler), err)]
    async fn flush(&self, crawler: &CrawlerName) -> Result<u64> {
        let done = sqlx::query("DELETE FROM queue WHERE crawler = ?1")
            .bind(crawler.as_str())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl RunStore for SqliteBackend {
    async fn begin(&self, crawler: &CrawlerName, run_id: &RunId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO runs (crawler, run_id, started_at, operations, aborted)
            VALUES (?1, ?2, ?3, 0, 0)
            "#,
        )
        .bind(crawler.as_str())
        .bind(run_id.as_str())
        .bind(epoch(at))
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn record_operation(&self, crawler: &CrawlerName, run_id: &RunId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (crawler, run_id, started_at, operations, aborted)
            VALUES (?1, ?2, ?3, 1, 0)
            ON CONFLICT (crawler, run_id)
            DO UPDATE SET operations = operations + 1
            "#,
        )
        .bind(crawler.as_str())
        .bind(run_id.as_str())
        .bind(epoch(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn mark_ended(
        &self,
        crawler: &CrawlerName,
        run_id: &RunId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET ended_at = ?3 WHERE crawler = ?1 AND run_id = ?2 AND ended_at IS NULL",
        )
        .bind(crawler.as_str())
        .bind(run_id.as_str())
        .bind(epoch(at))
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn last_run(&self, crawler: &CrawlerName) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT MAX(started_at) AS last FROM runs WHERE crawler = ?1")
            .bind(crawler.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_err)?;
        let last: Option<i64> = row.try_get("last").map_err(sqlx_err)?;
        Ok(last.map(from_epoch))
    }

    async fn op_count(&self, crawler: &CrawlerName) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(operations), 0) AS total FROM runs WHERE crawler = ?1",
        )
        .bind(crawler.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_err)?;
        let total: i64 = row.try_get("total").map_err(sqlx_err)?;
        Ok(total as u64)
    }

    async fn runs(&self, crawler: &CrawlerName) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT crawler, run_id, started_at, ended_at, operations, aborted
            FROM runs WHERE crawler = ?1
            ORDER BY started_at DESC, run_id
            "#,
        )
        .bind(crawler.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(decode_run).collect()
    }

    async fn latest_run_id(&self, crawler: &CrawlerName) -> Result<Option<RunId>> {
        let row = sqlx::query(
            "SELECT run_id FROM runs WHERE crawler = ?1 ORDER BY started_at DESC, rowid DESC LIMIT 1",
        )
        .bind(crawler.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(row
            .map(|r| r.try_get::<String, _>("run_id").map_err(sqlx_err))
            .transpose()?
            .map(RunId::new))
    }

    async fn is_aborted(&self, crawler: &CrawlerName, run_id: &RunId) -> Result<bool> {
        let row = sqlx::query("SELECT aborted FROM runs WHERE crawler = ?1 AND run_id = ?2")
            .bind(crawler.as_str())
            .bind(run_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(row
            .map(|r| r.try_get::<i64, _>("aborted").map(|a| a != 0))
            .transpose()
            .map_err(sqlx_err)?
            .unwrap_or(false))
    }

    #[instrument(skip(self), fields(crawler = %crawler), err)]
    async fn abort_all(&self, crawler: &CrawlerName) -> Result<u64> {
        let done = sqlx::query(
            r#"
            UPDATE runs
            SET aborted = 1, ended_at = ?2
            WHERE crawler = ?1 AND aborted = 0 AND ended_at IS NULL
            "#,
        )
        .bind(crawler.as_str())
        .bind(epoch(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(done.rows_affected())
    }

    async fn flush(&self, crawler: &CrawlerName) -> Result<()> {
        sqlx::query("DELETE FROM runs WHERE crawler = ?1")
            .bind(crawler.as_str())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteBackend {
    async fn append(&self, event: Event) -> Result<()> {
        let payload = event
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO events (crawler, run_id, stage, level, message, payload, at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(event.crawler.as_str())
        .bind(event.run_id.as_str())
        .bind(event.stage.as_ref().map(|s| s.as_str()))
        .bind(event.level.as_str())
        .bind(&event.message)
        .bind(payload)
        .bind(epoch(event.at))
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn list(&self, crawler: &CrawlerName) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT crawler, run_id, stage, level, message, payload, at
            FROM events WHERE crawler = ?1
            ORDER BY id
            "#,
        )
        .bind(crawler.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(decode_event).collect()
    }

    #[instrument(skip(self), fields(crawler = %crawler), err)]
    async fn delete(&self, crawler: &CrawlerName) -> Result<u64> {
        let done = sqlx::query("DELETE FROM events WHERE crawler = ?1")
            .bind(crawler.as_str())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(done.rows_affected())
    }
}
