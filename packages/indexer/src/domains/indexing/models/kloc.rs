//! Repository KLOC time series. Append-only; rows are never mutated.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::sanitize::assert_safe_repository_full_name;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RepositoryKlocHistory {
    pub id: Uuid,
    pub repository_id: i64,
    pub repository_full_name: String,
    pub kloc: f64,
    pub total_lines: i64,
    pub language_breakdown: serde_json::Value,
    pub total_files: i64,
    pub code_files: i64,
    pub calculated_at: DateTime<Utc>,
}

impl RepositoryKlocHistory {
    pub async fn append(
        repository_id: i64,
        repository_full_name: &str,
        kloc: f64,
        total_lines: i64,
        language_breakdown: serde_json::Value,
        total_files: i64,
        code_files: i64,
        calculated_at: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Self> {
        assert_safe_repository_full_name(repository_full_name)?;
        let row = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO repository_kloc_history (
                id, repository_id, repository_full_name, kloc, total_lines,
                language_breakdown, total_files, code_files, calculated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(repository_id)
        .bind(repository_full_name)
        .bind(kloc)
        .bind(total_lines)
        .bind(&language_breakdown)
        .bind(total_files)
        .bind(code_files)
        .bind(calculated_at)
        .fetch_one(pool)
        .await?;

        Ok(row)
    }

    pub async fn latest_for(repository_full_name: &str, pool: &PgPool) -> Result<Option<Self>> {
        assert_safe_repository_full_name(repository_full_name)?;
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM repository_kloc_history
            WHERE repository_full_name = $1
            ORDER BY calculated_at DESC
            LIMIT 1
            "#,
        )
        .bind(repository_full_name)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }
}
