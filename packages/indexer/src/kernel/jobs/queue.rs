//! Postgres-backed job queue.
//!
//! Stores serialized commands in the `jobs` table. Deduplication is by
//! canonical task name: scheduling a name that already has a row updates
//! that row's `next_run_at` in place instead of inserting a duplicate.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{ErrorKind, Job};

/// Metadata a schedulable command must provide.
pub trait CommandMeta {
    /// The job type string used for registry dispatch.
    fn job_type(&self) -> &'static str;

    /// Canonical task name (the dedup key).
    fn name(&self) -> String;

    fn max_retries(&self) -> i32 {
        5
    }
}

/// Result of an enqueue: the job row id and whether an existing schedule was
/// updated in place.
#[derive(Debug, Clone)]
pub enum EnqueueResult {
    Created(Uuid),
    Updated(Uuid),
}

impl EnqueueResult {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Updated(id) => *id,
        }
    }
}

/// A claimed job ready for execution.
#[derive(Debug)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job: Job,
}

impl ClaimedJob {
    pub fn job_type(&self) -> &str {
        &self.job.job_type
    }

    pub fn deserialize<C: DeserializeOwned>(&self) -> Result<C> {
        let args = self
            .job
            .args
            .as_ref()
            .ok_or_else(|| anyhow!("job {} has no args", self.id))?;
        serde_json::from_value(args.clone())
            .map_err(|e| anyhow!("failed to deserialize job args: {}", e))
    }
}

/// Trait for job queue operations.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a command for immediate execution.
    async fn enqueue(&self, job_type: &'static str, name: String, args: serde_json::Value,
                     max_retries: i32) -> Result<EnqueueResult>;

    /// Schedule a command for future execution, upserting by name.
    async fn schedule(&self, job_type: &'static str, name: String, args: serde_json::Value,
                      max_retries: i32, run_at: DateTime<Utc>) -> Result<EnqueueResult>;

    /// Claim up to `limit` due jobs with FOR UPDATE SKIP LOCKED.
    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>>;

    /// Mark a job as successfully completed.
    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()>;

    /// Mark a job as failed; retryable failures are re-queued with backoff
    /// while attempts remain, otherwise the row is dead-lettered.
    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind) -> Result<()>;

    /// Extend the lease for a running job (heartbeat).
    async fn heartbeat(&self, job_id: Uuid) -> Result<()>;
}

/// Convenience wrappers over the raw trait for typed commands.
pub async fn enqueue_command<C>(queue: &dyn JobQueue, command: &C) -> Result<EnqueueResult>
where
    C: CommandMeta + Serialize + Sync,
{
    queue
        .enqueue(
            command.job_type(),
            command.name(),
            serde_json::to_value(command)?,
            command.max_retries(),
        )
        .await
}

pub async fn schedule_command<C>(
    queue: &dyn JobQueue,
    command: &C,
    run_at: DateTime<Utc>,
) -> Result<EnqueueResult>
where
    C: CommandMeta + Serialize + Sync,
{
    queue
        .schedule(
            command.job_type(),
            command.name(),
            serde_json::to_value(command)?,
            command.max_retries(),
            run_at,
        )
        .await
}

/// PostgreSQL-backed job queue implementation.
pub struct PostgresJobQueue {
    pool: PgPool,
    default_lease_ms: i64,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            default_lease_ms: 60_000,
        }
    }

    pub fn with_lease_duration(pool: PgPool, lease_ms: i64) -> Self {
        Self {
            pool,
            default_lease_ms: lease_ms,
        }
    }

    async fn upsert(
        &self,
        job_type: &'static str,
        name: String,
        args: serde_json::Value,
        max_retries: i32,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<EnqueueResult> {
        let existing = Job::find_by_name(&name, &self.pool).await?;

        let job = Job::builder()
            .name(name)
            .job_type(job_type.to_string())
            .args(args)
            .max_retries(max_retries)
            .lease_duration_ms(self.default_lease_ms)
            .build();
        let job = Job {
            next_run_at: run_at,
            ..job
        };

        let inserted = job.upsert_by_name(&self.pool).await?;

        tracing::debug!(
            job_id = %inserted.id,
            name = %inserted.name,
            job_type = %inserted.job_type,
            run_at = ?run_at,
            updated_in_place = existing.is_some(),
            "scheduled job"
        );

        match existing {
            Some(_) => Ok(EnqueueResult::Updated(inserted.id)),
            None => Ok(EnqueueResult::Created(inserted.id)),
        }
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(
        &self,
        job_type: &'static str,
        name: String,
        args: serde_json::Value,
        max_retries: i32,
    ) -> Result<EnqueueResult> {
        self.upsert(job_type, name, args, max_retries, None).await
    }

    async fn schedule(
        &self,
        job_type: &'static str,
        name: String,
        args: serde_json::Value,
        max_retries: i32,
        run_at: DateTime<Utc>,
    ) -> Result<EnqueueResult> {
        self.upsert(job_type, name, args, max_retries, Some(run_at))
            .await
    }

    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        let jobs = Job::claim_jobs(limit, worker_id, self.default_lease_ms, &self.pool).await?;

        Ok(jobs
            .into_iter()
            .map(|job| ClaimedJob { id: job.id, job })
            .collect())
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        // Guarded on `running`: a handler that scheduled its own follow-up
        // has already flipped this row back to pending with a new
        // next_run_at, and that schedule must survive.
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind) -> Result<()> {
        let job = Job::find_by_id(job_id, &self.pool).await?;

        if kind.should_retry() && job.retry_count + 1 < job.max_retries {
            // Re-queue the same row with exponential backoff.
            let delay_secs = 2i64.pow(job.retry_count as u32).min(3600);
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    retry_count = retry_count + 1,
                    next_run_at = NOW() + ($1 || ' seconds')::INTERVAL,
                    error_message = $2,
                    error_kind = $3,
                    lease_expires_at = NULL,
                    updated_at = NOW()
                WHERE id = $4
                "#,
            )
            .bind(delay_secs.to_string())
            .bind(error)
            .bind(kind.as_str())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'dead_letter',
                    retry_count = retry_count + 1,
                    error_message = $1,
                    error_kind = $2,
                    lease_expires_at = NULL,
                    updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(error)
            .bind(kind.as_str())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $2 AND status = 'running'
            "#,
        )
        .bind(self.default_lease_ms.to_string())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// In-memory queue for tests
// ============================================================================

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::kernel::jobs::job::JobStatus;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory JobQueue capturing scheduled work for assertions.
    #[derive(Default)]
    pub struct MemoryJobQueue {
        pub jobs: Mutex<HashMap<String, Job>>,
    }

    impl MemoryJobQueue {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn scheduled_names(&self) -> Vec<String> {
            let jobs = self.jobs.lock().unwrap();
            let mut names: Vec<_> = jobs.keys().cloned().collect();
            names.sort();
            names
        }

        pub fn job_named(&self, name: &str) -> Option<Job> {
            self.jobs.lock().unwrap().get(name).cloned()
        }
    }

    #[async_trait]
    impl JobQueue for MemoryJobQueue {
        async fn enqueue(
            &self,
            job_type: &'static str,
            name: String,
            args: serde_json::Value,
            max_retries: i32,
        ) -> Result<EnqueueResult> {
            self.schedule(job_type, name, args, max_retries, Utc::now())
                .await
        }

        async fn schedule(
            &self,
            job_type: &'static str,
            name: String,
            args: serde_json::Value,
            max_retries: i32,
            run_at: DateTime<Utc>,
        ) -> Result<EnqueueResult> {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(existing) = jobs.get_mut(&name) {
                existing.next_run_at = Some(run_at);
                existing.args = Some(args);
                existing.status = JobStatus::Pending;
                return Ok(EnqueueResult::Updated(existing.id));
            }
            let job = Job::builder()
                .name(name.clone())
                .job_type(job_type.to_string())
                .args(args)
                .max_retries(max_retries)
                .next_run_at(run_at)
                .build();
            let id = job.id;
            jobs.insert(name, job);
            Ok(EnqueueResult::Created(id))
        }

        async fn claim(&self, _worker_id: &str, _limit: i64) -> Result<Vec<ClaimedJob>> {
            Ok(Vec::new())
        }

        async fn mark_succeeded(&self, _job_id: Uuid) -> Result<()> {
            Ok(())
        }

        async fn mark_failed(&self, _job_id: Uuid, _error: &str, _kind: ErrorKind) -> Result<()> {
            Ok(())
        }

        async fn heartbeat(&self, _job_id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn repeated_schedules_for_one_name_leave_one_job() {
        let queue = MemoryJobQueue::new();
        for i in 0..5 {
            queue
                .schedule(
                    "index_commits",
                    "commit_indexing_repo_1_retry".to_string(),
                    serde_json::json!({"repository_id": 1}),
                    5,
                    Utc::now() + chrono::Duration::minutes(i),
                )
                .await
                .unwrap();
        }
        assert_eq!(
            queue.scheduled_names(),
            vec!["commit_indexing_repo_1_retry".to_string()]
        );
    }
}
