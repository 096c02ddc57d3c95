//! Pull request records, keyed by (repository_full_name, number).

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::sanitize::assert_safe_repository_full_name;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PullRequest {
    pub id: Uuid,
    pub repository_full_name: String,
    pub number: i64,
    pub title: String,
    pub author: String,
    pub state: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merged_by: String,
    pub requested_reviewers: Vec<String>,
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    pub commits_count: i64,
    pub additions_count: i64,
    pub deletions_count: i64,
    pub changed_files_count: i64,
    pub review_comments_count: i64,
    pub comments_count: i64,
    pub url: String,
    pub payload: Option<serde_json::Value>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPullRequest {
    pub repository_full_name: String,
    pub number: i64,
    pub title: String,
    pub author: String,
    pub state: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merged_by: String,
    pub requested_reviewers: Vec<String>,
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    pub commits_count: i64,
    pub additions_count: i64,
    pub deletions_count: i64,
    pub changed_files_count: i64,
    pub review_comments_count: i64,
    pub comments_count: i64,
    pub url: String,
    pub payload: Option<serde_json::Value>,
}

impl NewPullRequest {
    /// Effective state: GitHub reports merged PRs as "closed" with a
    /// merged_at timestamp.
    pub fn effective_state(&self) -> &str {
        if self.merged_at.is_some() {
            "merged"
        } else {
            &self.state
        }
    }
}

impl PullRequest {
    pub async fn upsert(new: &NewPullRequest, pool: &PgPool) -> Result<Self> {
        assert_safe_repository_full_name(&new.repository_full_name)?;
        let pr = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO pull_requests (
                id, repository_full_name, number, title, author, state,
                created_at, updated_at, closed_at, merged_at, merged_by,
                requested_reviewers, assignees, labels,
                commits_count, additions_count, deletions_count, changed_files_count,
                review_comments_count, comments_count, url, payload, synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, NOW())
            ON CONFLICT (repository_full_name, number) DO UPDATE SET
                title = EXCLUDED.title,
                author = EXCLUDED.author,
                state = EXCLUDED.state,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                closed_at = EXCLUDED.closed_at,
                merged_at = EXCLUDED.merged_at,
                merged_by = EXCLUDED.merged_by,
                requested_reviewers = EXCLUDED.requested_reviewers,
                assignees = EXCLUDED.assignees,
                labels = EXCLUDED.labels,
                commits_count = EXCLUDED.commits_count,
                additions_count = EXCLUDED.additions_count,
                deletions_count = EXCLUDED.deletions_count,
                changed_files_count = EXCLUDED.changed_files_count,
                review_comments_count = EXCLUDED.review_comments_count,
                comments_count = EXCLUDED.comments_count,
                payload = EXCLUDED.payload,
                synced_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.repository_full_name)
        .bind(new.number)
        .bind(&new.title)
        .bind(&new.author)
        .bind(new.effective_state())
        .bind(new.created_at)
        .bind(new.updated_at)
        .bind(new.closed_at)
        .bind(new.merged_at)
        .bind(&new.merged_by)
        .bind(&new.requested_reviewers)
        .bind(&new.assignees)
        .bind(&new.labels)
        .bind(new.commits_count)
        .bind(new.additions_count)
        .bind(new.deletions_count)
        .bind(new.changed_files_count)
        .bind(new.review_comments_count)
        .bind(new.comments_count)
        .bind(&new.url)
        .bind(&new.payload)
        .fetch_one(pool)
        .await?;

        Ok(pr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewPullRequest {
        NewPullRequest {
            repository_full_name: "octo/widgets".to_string(),
            number: 12,
            title: "Add things".to_string(),
            author: "octocat".to_string(),
            state: "closed".to_string(),
            created_at: None,
            updated_at: None,
            closed_at: None,
            merged_at: None,
            merged_by: String::new(),
            requested_reviewers: Vec::new(),
            assignees: Vec::new(),
            labels: Vec::new(),
            commits_count: 0,
            additions_count: 0,
            deletions_count: 0,
            changed_files_count: 0,
            review_comments_count: 0,
            comments_count: 0,
            url: String::new(),
            payload: None,
        }
    }

    #[test]
    fn merged_at_promotes_closed_to_merged() {
        let mut pr = sample();
        assert_eq!(pr.effective_state(), "closed");

        pr.merged_at = Some(Utc::now());
        assert_eq!(pr.effective_state(), "merged");
    }
}
