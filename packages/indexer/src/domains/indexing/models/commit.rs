//! Commit records, keyed by (repository_full_name, sha).

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::sanitize::assert_safe_repository_full_name;

/// Per-file change stats, stored as a JSONB list on the commit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    pub additions: i64,
    pub deletions: i64,
    pub changes: i64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Commit {
    pub id: Uuid,
    pub repository_full_name: String,
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
    pub authored_date: Option<DateTime<Utc>>,
    pub committed_date: Option<DateTime<Utc>>,
    pub additions: i64,
    pub deletions: i64,
    pub total_changes: i64,
    pub files_changed: serde_json::Value,
    pub commit_type: String,
    pub url: String,
    pub synced_at: DateTime<Utc>,
}

/// Everything needed to upsert one commit. Both the API and the local-clone
/// pipelines produce this.
#[derive(Debug, Clone)]
pub struct NewCommit {
    pub repository_full_name: String,
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
    pub authored_date: Option<DateTime<Utc>>,
    pub committed_date: Option<DateTime<Utc>>,
    pub additions: i64,
    pub deletions: i64,
    pub total_changes: i64,
    pub files_changed: Vec<FileChange>,
    pub commit_type: String,
}

impl NewCommit {
    pub fn github_url(&self) -> String {
        format!(
            "https://github.com/{}/commit/{}",
            self.repository_full_name, self.sha
        )
    }
}

impl Commit {
    /// Insert or update by the (repository, sha) key. Commits are immutable
    /// upstream, so a second pass only refreshes derived fields.
    pub async fn upsert(new: &NewCommit, pool: &PgPool) -> Result<Self> {
        assert_safe_repository_full_name(&new.repository_full_name)?;
        let commit = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO commits (
                id, repository_full_name, sha, message, author_name, author_email,
                committer_name, committer_email, authored_date, committed_date,
                additions, deletions, total_changes, files_changed, commit_type, url, synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW())
            ON CONFLICT (repository_full_name, sha) DO UPDATE SET
                message = EXCLUDED.message,
                author_name = EXCLUDED.author_name,
                author_email = EXCLUDED.author_email,
                committer_name = EXCLUDED.committer_name,
                committer_email = EXCLUDED.committer_email,
                authored_date = EXCLUDED.authored_date,
                committed_date = EXCLUDED.committed_date,
                additions = EXCLUDED.additions,
                deletions = EXCLUDED.deletions,
                total_changes = EXCLUDED.total_changes,
                files_changed = EXCLUDED.files_changed,
                commit_type = EXCLUDED.commit_type,
                synced_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.repository_full_name)
        .bind(&new.sha)
        .bind(&new.message)
        .bind(&new.author_name)
        .bind(&new.author_email)
        .bind(&new.committer_name)
        .bind(&new.committer_email)
        .bind(new.authored_date)
        .bind(new.committed_date)
        .bind(new.additions)
        .bind(new.deletions)
        .bind(new.total_changes)
        .bind(serde_json::to_value(&new.files_changed)?)
        .bind(&new.commit_type)
        .bind(new.github_url())
        .fetch_one(pool)
        .await?;

        Ok(commit)
    }

    pub async fn exists(repository_full_name: &str, sha: &str, pool: &PgPool) -> Result<bool> {
        assert_safe_repository_full_name(repository_full_name)?;
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM commits WHERE repository_full_name = $1 AND sha = $2",
        )
        .bind(repository_full_name)
        .bind(sha)
        .fetch_one(pool)
        .await?;

        Ok(count > 0)
    }

    pub async fn count_for_repository(repository_full_name: &str, pool: &PgPool) -> Result<i64> {
        assert_safe_repository_full_name(repository_full_name)?;
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM commits WHERE repository_full_name = $1")
            .bind(repository_full_name)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_url_is_derived_from_key() {
        let new = NewCommit {
            repository_full_name: "octo/widgets".to_string(),
            sha: "abc123".to_string(),
            message: String::new(),
            author_name: String::new(),
            author_email: String::new(),
            committer_name: String::new(),
            committer_email: String::new(),
            authored_date: None,
            committed_date: None,
            additions: 0,
            deletions: 0,
            total_changes: 0,
            files_changed: Vec::new(),
            commit_type: "other".to_string(),
        };
        assert_eq!(
            new.github_url(),
            "https://github.com/octo/widgets/commit/abc123"
        );
    }
}
