//! Job model for background task execution.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    DeadLetter,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
}

impl ErrorKind {
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::NonRetryable => "non_retryable",
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

const JOB_COLUMNS: &str = "id, name, job_type, args, status, next_run_at, last_run_at, \
                           max_retries, retry_count, lease_duration_ms, lease_expires_at, \
                           worker_id, error_message, error_kind, created_at, updated_at";

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    /// Canonical task name; unique, and the deduplication key for schedules.
    pub name: String,
    pub job_type: String,

    #[builder(default, setter(strip_option))]
    pub args: Option<serde_json::Value>,

    #[builder(default)]
    pub status: JobStatus,

    #[builder(default, setter(strip_option))]
    pub next_run_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub last_run_at: Option<DateTime<Utc>>,

    #[builder(default = 5)]
    pub max_retries: i32,
    #[builder(default = 0)]
    pub retry_count: i32,

    #[builder(default = 60_000)]
    pub lease_duration_ms: i64,
    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,

    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_kind: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Check if the job is ready to run
    pub fn is_ready(&self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        if self.retry_count >= self.max_retries {
            return false;
        }
        match self.next_run_at {
            None => true,
            Some(next_run) => next_run <= Utc::now(),
        }
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(pool)
        .await?;

        Ok(job)
    }

    pub async fn find_by_name(name: &str, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// Insert, or move the schedule in place when a row with the same
    /// canonical name exists. The dedup primitive: N repeated schedules for
    /// one name leave exactly one row.
    pub async fn upsert_by_name(&self, pool: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO jobs (
                id, name, job_type, args, status, next_run_at, last_run_at,
                max_retries, retry_count, lease_duration_ms, lease_expires_at,
                worker_id, error_message, error_kind, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (name) DO UPDATE SET
                job_type = EXCLUDED.job_type,
                args = EXCLUDED.args,
                status = 'pending',
                next_run_at = EXCLUDED.next_run_at,
                max_retries = EXCLUDED.max_retries,
                retry_count = 0,
                error_message = NULL,
                error_kind = NULL,
                updated_at = NOW()
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.job_type)
        .bind(&self.args)
        .bind(self.status)
        .bind(self.next_run_at)
        .bind(self.last_run_at)
        .bind(self.max_retries)
        .bind(self.retry_count)
        .bind(self.lease_duration_ms)
        .bind(self.lease_expires_at)
        .bind(&self.worker_id)
        .bind(&self.error_message)
        .bind(&self.error_kind)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(pool)
        .await?;

        Ok(job)
    }

    /// Claim jobs atomically using FOR UPDATE SKIP LOCKED.
    /// Also recovers stale jobs with expired leases.
    pub async fn claim_jobs(
        limit: i64,
        worker_id: &str,
        lease_duration_ms: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE
                    (status = 'pending' AND (next_run_at IS NULL OR next_run_at <= NOW()) AND retry_count < max_retries)
                    OR (status = 'running' AND lease_expires_at < NOW())
                ORDER BY COALESCE(next_run_at, created_at)
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET
                status = 'running',
                last_run_at = NOW(),
                lease_expires_at = NOW() + ($2 || ' milliseconds')::INTERVAL,
                worker_id = $3,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(limit)
        .bind(lease_duration_ms.to_string())
        .bind(worker_id)
        .fetch_all(pool)
        .await?;

        Ok(jobs)
    }

    /// Extend the lease for a running job (heartbeat)
    pub async fn extend_lease(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $2 AND status = 'running'
            "#,
        )
        .bind(self.lease_duration_ms.to_string())
        .bind(self.id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Find the next scheduled run time for any pending job
    pub async fn find_next_run_time(pool: &PgPool) -> Result<Option<DateTime<Utc>>> {
        let result = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            SELECT next_run_at
            FROM jobs
            WHERE status = 'pending'
              AND next_run_at IS NOT NULL
              AND retry_count < max_retries
            ORDER BY next_run_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(pool)
        .await?;

        Ok(result)
    }

    /// Delete finished rows older than the cutoff.
    pub async fn delete_finished_before(cutoff: DateTime<Utc>, pool: &PgPool) -> Result<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('succeeded', 'cancelled', 'dead_letter')
              AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::builder()
            .name("commit_indexing_repo_1".to_string())
            .job_type("index_commits".to_string())
            .build()
    }

    #[test]
    fn new_job_has_default_max_retries_of_5() {
        let job = sample_job();
        assert_eq!(job.max_retries, 5);
    }

    #[test]
    fn new_job_starts_with_pending_status() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn is_ready_pending_job_without_schedule() {
        let job = sample_job();
        assert!(job.is_ready());
    }

    #[test]
    fn is_ready_running_job_is_not_ready() {
        let mut job = sample_job();
        job.status = JobStatus::Running;
        assert!(!job.is_ready());
    }

    #[test]
    fn is_ready_future_job_is_not_ready() {
        let mut job = sample_job();
        job.next_run_at = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(!job.is_ready());
    }

    #[test]
    fn is_ready_exhausted_retries_is_not_ready() {
        let mut job = sample_job();
        job.retry_count = job.max_retries;
        assert!(!job.is_ready());
    }

    #[test]
    fn retryable_error_should_retry() {
        assert!(ErrorKind::Retryable.should_retry());
        assert!(!ErrorKind::NonRetryable.should_retry());
    }
}
