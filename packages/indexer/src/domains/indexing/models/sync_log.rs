//! Per-run records for the local-clone commit pipeline.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncLog {
    pub id: Uuid,
    pub repository_full_name: String,
    pub sync_type: String,
    pub status: String,
    pub commits_processed: i64,
    pub commits_new: i64,
    pub commits_updated: i64,
    pub commits_skipped: i64,
    pub error_message: Option<String>,
    pub last_commit_date: Option<DateTime<Utc>>,
    pub oldest_commit_date: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncLog {
    pub async fn start(repository_full_name: &str, sync_type: &str, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO sync_logs (id, repository_full_name, sync_type, status)
            VALUES ($1, $2, $3, 'running')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(repository_full_name)
        .bind(sync_type)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        &mut self,
        commits_processed: i64,
        commits_new: i64,
        commits_updated: i64,
        commits_skipped: i64,
        last_commit_date: Option<DateTime<Utc>>,
        oldest_commit_date: Option<DateTime<Utc>>,
        pool: &PgPool,
    ) -> Result<()> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE sync_logs
            SET status = 'completed',
                commits_processed = $2,
                commits_new = $3,
                commits_updated = $4,
                commits_skipped = $5,
                last_commit_date = $6,
                oldest_commit_date = $7,
                completed_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(commits_processed)
        .bind(commits_new)
        .bind(commits_updated)
        .bind(commits_skipped)
        .bind(last_commit_date)
        .bind(oldest_commit_date)
        .fetch_one(pool)
        .await?;

        *self = updated;
        Ok(())
    }

    pub async fn fail(&mut self, error: &str, pool: &PgPool) -> Result<()> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE sync_logs
            SET status = 'failed',
                error_message = $2,
                completed_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(error)
        .fetch_one(pool)
        .await?;

        *self = updated;
        Ok(())
    }
}
