//! Repository registry rows.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::sanitize::assert_safe_repository_full_name;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Repository {
    pub id: i64,
    pub github_id: Option<i64>,
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
    pub is_indexed: bool,
    pub owner_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    /// Owner half of `owner/repo`.
    pub fn owner(&self) -> &str {
        self.full_name.split('/').next().unwrap_or("")
    }

    /// Repo half of `owner/repo`.
    pub fn repo(&self) -> &str {
        self.full_name.split('/').nth(1).unwrap_or("")
    }

    pub async fn find_by_id(id: i64, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM repositories WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM repositories ORDER BY id")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_indexed(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM repositories WHERE is_indexed = TRUE ORDER BY id")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn mark_indexed(id: i64, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE repositories SET is_indexed = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Whether a fresh KLOC record exists within `max_age`; used to decide
    /// if a completed backfill should trigger a recount.
    pub async fn has_recent_kloc(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<bool> {
        assert_safe_repository_full_name(&self.full_name)?;
        let cutoff = now - max_age;
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM repository_kloc_history
            WHERE repository_full_name = $1 AND calculated_at >= $2
            "#,
        )
        .bind(&self.full_name)
        .bind(cutoff)
        .fetch_one(pool)
        .await?;

        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Repository {
        Repository {
            id: 1,
            github_id: Some(99),
            full_name: "octo/widgets".to_string(),
            clone_url: "https://github.com/octo/widgets.git".to_string(),
            default_branch: "main".to_string(),
            is_indexed: false,
            owner_id: Some(7),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn owner_and_repo_split_full_name() {
        let repo = sample();
        assert_eq!(repo.owner(), "octo");
        assert_eq!(repo.repo(), "widgets");
    }
}
