//! SQLite implementation of `queuectl-core`'s [`Store`] trait.
//!
//! # Database schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id TEXT PRIMARY KEY,
//!     command TEXT NOT NULL,
//!     state TEXT NOT NULL,
//!     attempts INTEGER NOT NULL DEFAULT 0,
//!     max_retries INTEGER NOT NULL DEFAULT 3,
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     next_retry_at TEXT,
//!     locked_by TEXT,
//!     locked_at TEXT,
//!     last_error TEXT,
//!     output TEXT
//! );
//! ```
//!
//! Timestamps are stored as RFC 3339 text (`chrono`'s default), which
//! sorts identically to chronological order for the fixed-width format
//! `to_rfc3339()` produces, so the lease/backoff predicates can be plain
//! text comparisons.
//!
//! # Concurrency
//!
//! `acquire_one` is the only operation with a compound select+update; it
//! runs inside a `BEGIN IMMEDIATE` transaction so two connections can
//! never observe the same leasable job (spec §4.1, §5). Every other
//! writer uses a single `UPDATE ... WHERE state = 'processing' AND
//! locked_by = ?` statement, which SQLite already serializes against the
//! single writer lock.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use queuectl_core::job::{Job, JobState, NewJob};
use queuectl_core::retry::Decision;
use queuectl_core::store::{Counts, Store};
use queuectl_core::StoreError;

/// The lease TTL used by `acquire_one`'s leasable predicate (spec I6).
/// Distinct from `queuectl-core::Config::lease_ttl_seconds`, which is the
/// typed value the CLI reads from disk and passes in here.
#[derive(Debug, Clone, Copy)]
pub struct SqliteStoreConfig {
    pub lease_ttl: Duration,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(300),
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
    config: SqliteStoreConfig,
}

impl SqliteStore {
    /// Open (creating if absent) the SQLite database at `path` and run
    /// migrations. Uses WAL mode and a busy timeout so concurrent
    /// Worker processes queue briefly on contention instead of failing
    /// outright (spec §7 `StoreUnavailable` is reserved for timeouts
    /// beyond this).
    pub async fn open(path: &Path, config: SqliteStoreConfig) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single writer connection avoids SQLITE_BUSY storms across
            // the pool itself; readers still fan out fine under WAL.
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self { pool, config };
        store.migrate().await?;
        Ok(store)
    }

    /// In-process pool variant, used by tests that want a throwaway DB.
    pub async fn open_in_memory(config: SqliteStoreConfig) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool, config };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                command TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                next_retry_at TEXT,
                locked_by TEXT,
                locked_at TEXT,
                last_error TEXT,
                output TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs (state, created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, sqlx::Error> {
    let state_str: String = row.try_get("state")?;
    let state: JobState = state_str
        .parse()
        .map_err(|e: String| sqlx::Error::Decode(e.into()))?;

    Ok(Job {
        id: row.try_get("id")?,
        command: row.try_get("command")?,
        state,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        created_at: parse_ts(row, "created_at")?,
        updated_at: parse_ts(row, "updated_at")?,
        next_retry_at: parse_ts_opt(row, "next_retry_at")?,
        locked_by: row.try_get("locked_by")?,
        locked_at: parse_ts_opt(row, "locked_at")?,
        last_error: row.try_get("last_error")?,
        output: row.try_get("output")?,
    })
}

fn parse_ts(row: &sqlx::sqlite::SqliteRow, col: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.try_get(col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn parse_ts_opt(
    row: &sqlx::sqlite::SqliteRow,
    col: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))
    })
    .transpose()
}

fn map_sqlx_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE constraint failed") => {
            StoreError::DuplicateId("<unknown>".to_string())
        }
        sqlx::Error::Database(db_err) if db_err.message().contains("database is locked") => {
            StoreError::StoreUnavailable(db_err.message().to_string())
        }
        sqlx::Error::PoolTimedOut => StoreError::StoreUnavailable("connection pool exhausted".into()),
        sqlx::Error::Io(_) => StoreError::StoreUnavailable(err.to_string()),
        _ => StoreError::StoreUnavailable(err.to_string()),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert(&self, new_job: NewJob, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let now_str = now.to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at)
            VALUES (?, ?, 'pending', 0, ?, ?, ?)
            "#,
        )
        .bind(&new_job.id)
        .bind(&new_job.command)
        .bind(new_job.max_retries as i64)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Job {
                id: new_job.id,
                command: new_job.command,
                state: JobState::Pending,
                attempts: 0,
                max_retries: new_job.max_retries,
                created_at: now,
                updated_at: now,
                next_retry_at: None,
                locked_by: None,
                locked_at: None,
                last_error: None,
                output: None,
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE constraint failed") => {
                Err(StoreError::DuplicateId(new_job.id))
            }
            Err(err) => Err(map_sqlx_err(err)),
        }
    }

    async fn acquire_one(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_err)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_err)?;

        let now_str = now.to_rfc3339();
        let lease_cutoff = (now - chrono::Duration::from_std(self.config.lease_ttl).unwrap()).to_rfc3339();

        // Re-evaluates the leasable predicate (spec I6) inside this same
        // transaction, never against a stale read from outside it.
        let candidate = sqlx::query(
            r#"
            SELECT id FROM jobs
            WHERE (state = 'pending')
               OR (state = 'failed' AND next_retry_at <= ?)
               OR (state = 'processing' AND locked_at < ?)
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(&now_str)
        .bind(&lease_cutoff)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;

        let Some(candidate) = candidate else {
            sqlx::query("COMMIT").execute(&mut *conn).await.map_err(map_sqlx_err)?;
            return Ok(None);
        };

        let id: String = candidate.try_get("id").map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'processing', locked_by = ?, locked_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(worker_id)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&id)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;

        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(&id)
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx_err)?;

        sqlx::query("COMMIT").execute(&mut *conn).await.map_err(map_sqlx_err)?;

        Ok(Some(row_to_job(&row).map_err(map_sqlx_err)?))
    }

    async fn complete(
        &self,
        id: &str,
        worker_id: &str,
        output: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed', locked_by = NULL, locked_at = NULL, output = ?, updated_at = ?
            WHERE id = ? AND state = 'processing' AND locked_by = ?
            "#,
        )
        .bind(&output)
        .bind(now.to_rfc3339())
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::LeaseLost(id.to_string()));
        }
        Ok(())
    }

    async fn fail(
        &self,
        id: &str,
        worker_id: &str,
        error: Option<String>,
        output: Option<String>,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_err)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_err)?;

        let owned = sqlx::query(
            "SELECT 1 FROM jobs WHERE id = ? AND state = 'processing' AND locked_by = ?",
        )
        .bind(id)
        .bind(worker_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_err)?;

        if owned.is_none() {
            sqlx::query("ROLLBACK").execute(&mut *conn).await.map_err(map_sqlx_err)?;
            return Err(StoreError::LeaseLost(id.to_string()));
        }

        let now_str = now.to_rfc3339();
        match decision {
            Decision::Retry { delay } => {
                let next_retry_at = (now + delay).to_rfc3339();
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'failed', attempts = attempts + 1, last_error = ?, output = ?,
                        next_retry_at = ?, locked_by = NULL, locked_at = NULL, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&error)
                .bind(&output)
                .bind(&next_retry_at)
                .bind(&now_str)
                .bind(id)
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx_err)?;
            }
            Decision::Dead => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'dead', attempts = attempts + 1, last_error = ?, output = ?,
                        next_retry_at = NULL, locked_by = NULL, locked_at = NULL, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&error)
                .bind(&output)
                .bind(&now_str)
                .bind(id)
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx_err)?;
            }
        }

        sqlx::query("COMMIT").execute(&mut *conn).await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn heartbeat(&self, id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET locked_at = ? WHERE id = ? AND state = 'processing' AND locked_by = ?
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::LeaseLost(id.to_string()));
        }
        Ok(())
    }

    async fn dlq_retry(&self, id: &str, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let existing = self.get(id).await?;
        let Some(existing) = existing else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        if existing.state != JobState::Dead {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                actual: existing.state.as_str(),
                expected: "dead",
            });
        }

        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', attempts = 0, next_retry_at = NULL, last_error = NULL, updated_at = ?
            WHERE id = ? AND state = 'dead'
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self, state: Option<JobState>, limit: u32) -> Result<Vec<Job>, StoreError> {
        let rows = match state {
            Some(state) => sqlx::query("SELECT * FROM jobs WHERE state = ? ORDER BY created_at ASC LIMIT ?")
                .bind(state.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await,
            None => sqlx::query("SELECT * FROM jobs ORDER BY created_at ASC LIMIT ?")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await,
        }
        .map_err(map_sqlx_err)?;

        rows.iter().map(|row| row_to_job(row).map_err(map_sqlx_err)).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(|row| row_to_job(&row).map_err(map_sqlx_err)).transpose()
    }

    async fn counts(&self) -> Result<Counts, StoreError> {
        let rows = sqlx::query("SELECT state, COUNT(*) as n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let mut counts = Counts::default();
        for row in rows {
            let state: String = row.try_get("state").map_err(map_sqlx_err)?;
            let n: i64 = row.try_get("n").map_err(map_sqlx_err)?;
            match state.as_str() {
                "pending" => counts.pending = n as u64,
                "processing" => counts.processing = n as u64,
                "completed" => counts.completed = n as u64,
                "failed" => counts.failed = n as u64,
                "dead" => counts.dead = n as u64,
                _ => {}
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_core::job::NewJob;

    async fn store() -> SqliteStore {
        SqliteStore::open_in_memory(SqliteStoreConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn insert_then_acquire_transitions_to_processing() {
        let store = store().await;
        let now = Utc::now();
        store
            .insert(NewJob { id: "a".into(), command: "echo hi".into(), max_retries: 3 }, now)
            .await
            .unwrap();

        let job = store.acquire_one("w1", now).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.locked_by.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = store().await;
        let now = Utc::now();
        store.insert(NewJob { id: "a".into(), command: "echo hi".into(), max_retries: 3 }, now).await.unwrap();
        let err = store
            .insert(NewJob { id: "a".into(), command: "echo bye".into(), max_retries: 3 }, now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(_)));

        let rows = store.list(None, 100).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].command, "echo hi");
    }

    #[tokio::test]
    async fn complete_requires_matching_lease() {
        let store = store().await;
        let now = Utc::now();
        store.insert(NewJob { id: "a".into(), command: "echo hi".into(), max_retries: 3 }, now).await.unwrap();
        store.acquire_one("w1", now).await.unwrap();

        let err = store.complete("a", "w2", Some("wrong worker".into()), now).await.unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost(_)));

        store.complete("a", "w1", Some("hi".into()), now).await.unwrap();
        let job = store.get("a").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
    }

    #[tokio::test]
    async fn stale_lease_is_reclaimable() {
        let store = store().await;
        let now = Utc::now();
        store.insert(NewJob { id: "a".into(), command: "sleep 100".into(), max_retries: 3 }, now).await.unwrap();
        store.acquire_one("w1", now).await.unwrap();

        // Still within TTL: not leasable by anyone else yet.
        assert!(store.acquire_one("w2", now + chrono::Duration::seconds(10)).await.unwrap().is_none());

        // Past the default 300s TTL: reclaimable.
        let later = now + chrono::Duration::seconds(301);
        let reclaimed = store.acquire_one("w2", later).await.unwrap().unwrap();
        assert_eq!(reclaimed.locked_by.as_deref(), Some("w2"));
    }

    #[tokio::test]
    async fn dlq_retry_resets_dead_job() {
        let store = store().await;
        let now = Utc::now();
        store.insert(NewJob { id: "a".into(), command: "exit 1".into(), max_retries: 0 }, now).await.unwrap();
        store.acquire_one("w1", now).await.unwrap();
        store
            .fail("a", "w1", Some("boom".into()), None, Decision::Dead, now)
            .await
            .unwrap();

        let job = store.get("a").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Dead);

        let reset = store.dlq_retry("a", now).await.unwrap();
        assert_eq!(reset.state, JobState::Pending);
        assert_eq!(reset.attempts, 0);
    }

    #[tokio::test]
    async fn dlq_retry_on_non_dead_job_errors() {
        let store = store().await;
        let now = Utc::now();
        store.insert(NewJob { id: "a".into(), command: "echo hi".into(), max_retries: 3 }, now).await.unwrap();
        let err = store.dlq_retry("a", now).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn concurrent_acquire_never_double_leases() {
        let store = std::sync::Arc::new(store().await);
        let now = Utc::now();
        for i in 0..10 {
            store
                .insert(NewJob { id: format!("job-{i}"), command: "echo hi".into(), max_retries: 3 }, now)
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for w in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut acquired = Vec::new();
                loop {
                    match store.acquire_one(&format!("w{w}"), Utc::now()).await.unwrap() {
                        Some(job) => acquired.push(job.id),
                        None => break,
                    }
                }
                acquired
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 10);
    }
}
