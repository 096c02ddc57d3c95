//! Deployment records, keyed by the upstream deployment id.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::sanitize::assert_safe_repository_full_name;

/// Status states that still expect further transitions; a list ending in
/// one of these gets re-fetched.
const NON_TERMINAL_STATES: [&str; 4] = ["pending", "in_progress", "queued", "waiting"];

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deployment {
    pub id: Uuid,
    pub deployment_id: i64,
    pub repository_full_name: String,
    pub environment: String,
    pub creator: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Status history as reported upstream, newest last.
    pub statuses: serde_json::Value,
    pub payload: Option<serde_json::Value>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub deployment_id: i64,
    pub repository_full_name: String,
    pub environment: String,
    pub creator: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub payload: Option<serde_json::Value>,
}

impl Deployment {
    /// The state of the most recently appended status, lowercased.
    pub fn last_status_state(&self) -> Option<String> {
        self.statuses
            .as_array()
            .and_then(|list| list.last())
            .and_then(|status| status.get("state"))
            .and_then(|state| state.as_str())
            .map(|s| s.to_lowercase())
    }

    /// Whether the persisted status list needs a refresh from upstream:
    /// missing statuses, a non-terminal tail, or a moved `updated_at`.
    pub fn statuses_need_refresh(&self, upstream_updated_at: Option<DateTime<Utc>>) -> bool {
        let is_empty = self
            .statuses
            .as_array()
            .map(|list| list.is_empty())
            .unwrap_or(true);
        if is_empty {
            return true;
        }

        if let Some(last) = self.last_status_state() {
            if NON_TERMINAL_STATES.contains(&last.as_str()) {
                return true;
            }
        }

        match (upstream_updated_at, self.updated_at) {
            (Some(upstream), Some(stored)) => upstream != stored,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub async fn find_by_deployment_id(deployment_id: i64, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM deployments WHERE deployment_id = $1")
            .bind(deployment_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn upsert(new: &NewDeployment, pool: &PgPool) -> Result<Self> {
        assert_safe_repository_full_name(&new.repository_full_name)?;
        let deployment = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO deployments (
                id, deployment_id, repository_full_name, environment, creator,
                created_at, updated_at, payload, synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (deployment_id) DO UPDATE SET
                repository_full_name = EXCLUDED.repository_full_name,
                environment = EXCLUDED.environment,
                creator = EXCLUDED.creator,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                payload = EXCLUDED.payload,
                synced_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.deployment_id)
        .bind(&new.repository_full_name)
        .bind(&new.environment)
        .bind(&new.creator)
        .bind(new.created_at)
        .bind(new.updated_at)
        .bind(&new.payload)
        .fetch_one(pool)
        .await?;

        Ok(deployment)
    }

    /// Replace the status history.
    pub async fn set_statuses(&mut self, statuses: serde_json::Value, pool: &PgPool) -> Result<()> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE deployments
            SET statuses = $2, synced_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(&statuses)
        .fetch_one(pool)
        .await?;

        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(statuses: serde_json::Value) -> Deployment {
        Deployment {
            id: Uuid::new_v4(),
            deployment_id: 1,
            repository_full_name: "octo/widgets".to_string(),
            environment: "production".to_string(),
            creator: "octocat".to_string(),
            created_at: None,
            updated_at: None,
            statuses,
            payload: None,
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn empty_status_list_needs_refresh() {
        let deployment = sample(json!([]));
        assert!(deployment.statuses_need_refresh(None));
    }

    #[test]
    fn non_terminal_tail_needs_refresh() {
        for state in ["pending", "in_progress", "queued", "waiting"] {
            let deployment = sample(json!([{"state": state}]));
            assert!(
                deployment.statuses_need_refresh(None),
                "expected refresh for {state}"
            );
        }
    }

    #[test]
    fn terminal_tail_does_not_need_refresh() {
        for state in ["success", "failure", "error", "inactive"] {
            let deployment = sample(json!([{"state": state}]));
            assert!(
                !deployment.statuses_need_refresh(None),
                "expected no refresh for {state}"
            );
        }
    }

    #[test]
    fn moved_updated_at_needs_refresh() {
        let mut deployment = sample(json!([{"state": "success"}]));
        let stored = Utc::now();
        deployment.updated_at = Some(stored);

        assert!(!deployment.statuses_need_refresh(Some(stored)));
        assert!(deployment.statuses_need_refresh(Some(stored + chrono::Duration::minutes(5))));
    }
}
