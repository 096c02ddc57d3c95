//! Release records, keyed by the upstream release id.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::sanitize::assert_safe_repository_full_name;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Release {
    pub id: Uuid,
    pub release_id: i64,
    pub repository_full_name: String,
    pub tag_name: String,
    pub name: String,
    pub author: String,
    pub draft: bool,
    pub prerelease: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub url: String,
    pub assets: serde_json::Value,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRelease {
    pub release_id: i64,
    pub repository_full_name: String,
    pub tag_name: String,
    pub name: String,
    pub author: String,
    pub draft: bool,
    pub prerelease: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub url: String,
    pub assets: serde_json::Value,
}

impl Release {
    pub async fn upsert(new: &NewRelease, pool: &PgPool) -> Result<Self> {
        assert_safe_repository_full_name(&new.repository_full_name)?;
        let release = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO releases (
                id, release_id, repository_full_name, tag_name, name, author,
                draft, prerelease, created_at, published_at, url, assets, synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            ON CONFLICT (release_id) DO UPDATE SET
                tag_name = EXCLUDED.tag_name,
                name = EXCLUDED.name,
                author = EXCLUDED.author,
                draft = EXCLUDED.draft,
                prerelease = EXCLUDED.prerelease,
                created_at = EXCLUDED.created_at,
                published_at = EXCLUDED.published_at,
                assets = EXCLUDED.assets,
                synced_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.release_id)
        .bind(&new.repository_full_name)
        .bind(&new.tag_name)
        .bind(&new.name)
        .bind(&new.author)
        .bind(new.draft)
        .bind(new.prerelease)
        .bind(new.created_at)
        .bind(new.published_at)
        .bind(&new.url)
        .bind(&new.assets)
        .fetch_one(pool)
        .await?;

        Ok(release)
    }
}
