//! Durable per-(repository, entity) indexing state.
//!
//! Exactly one row exists per pair. The row is the single source of truth
//! for "is this pair currently being worked?": `begin` is a compare-and-set
//! that only one worker can win, and the periodic reaper returns rows whose
//! worker died back to `pending`.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::types::{genesis, CursorDirection, DateRange, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "indexing_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IndexingStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IndexingState {
    pub id: Uuid,
    pub repository_id: i64,
    pub repository_full_name: String,
    pub entity_kind: EntityKind,
    pub status: IndexingStatus,
    /// Cursor. Interpretation depends on `entity_kind.cursor_direction()`:
    /// the oldest point reached (Backward), the newest point reached
    /// (Forward), or the completion time of the last full fetch (Snapshot).
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub batch_size_days: i32,
    pub error_message: Option<String>,
    pub total_indexed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexingState {
    /// Fetch the state row for a pair, creating it with per-entity defaults
    /// on first encounter.
    pub async fn get_or_create(
        repository_id: i64,
        repository_full_name: &str,
        entity: EntityKind,
        pool: &PgPool,
    ) -> Result<Self> {
        sqlx::query(
            r#"
            INSERT INTO indexing_states (id, repository_id, repository_full_name, entity_kind, batch_size_days)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (repository_id, entity_kind) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(repository_id)
        .bind(repository_full_name)
        .bind(entity)
        .bind(entity.default_batch_days())
        .execute(pool)
        .await?;

        let state = sqlx::query_as::<_, Self>(
            "SELECT * FROM indexing_states WHERE repository_id = $1 AND entity_kind = $2",
        )
        .bind(repository_id)
        .bind(entity)
        .fetch_one(pool)
        .await?;

        Ok(state)
    }

    /// Whether a run should proceed for this pair right now.
    ///
    /// Denies while running, while inside the per-entity minimum interval,
    /// and once an errored pair has exhausted its retries. Pure so tests can
    /// pin the clock.
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        if self.status == IndexingStatus::Running {
            return false;
        }

        if self.status == IndexingStatus::Error && self.retry_count >= self.max_retries {
            return false;
        }

        if let Some(last_run) = self.last_run_at {
            if now - last_run < Duration::minutes(1) {
                return false;
            }
        }

        // Snapshot entities re-read the whole upstream set; space full
        // fetches out by the entity's minimum interval.
        if self.entity_kind.cursor_direction() == CursorDirection::Snapshot {
            if let Some(last_indexed) = self.last_indexed_at {
                if now - last_indexed < self.entity_kind.min_run_interval() {
                    return false;
                }
            }
        }

        true
    }

    /// Derive the date window the next run should cover. `None` for
    /// snapshot entities, which have no window.
    pub fn next_window(&self, now: DateTime<Utc>) -> Option<DateRange> {
        let batch = Duration::days(self.batch_size_days as i64);
        match self.entity_kind.cursor_direction() {
            CursorDirection::Backward => {
                let until = self.last_indexed_at.unwrap_or(now);
                Some(DateRange {
                    since: until - batch,
                    until,
                })
            }
            CursorDirection::Forward => {
                let since = self.last_indexed_at.unwrap_or_else(genesis);
                Some(DateRange { since, until: now })
            }
            CursorDirection::Snapshot => None,
        }
    }

    /// Transition to `running`. Compare-and-set: only one caller can win
    /// while the row is not already running. Returns false when another
    /// worker holds the pair.
    pub async fn begin(&mut self, now: DateTime<Utc>, pool: &PgPool) -> Result<bool> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE indexing_states
            SET status = 'running',
                last_run_at = $2,
                retry_count = CASE WHEN status = 'error' THEN retry_count + 1 ELSE retry_count END,
                updated_at = NOW()
            WHERE id = $1 AND status <> 'running'
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(now)
        .fetch_optional(pool)
        .await?;

        match updated {
            Some(state) => {
                *self = state;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Record a successful run: move the cursor, add to the running total,
    /// clear error bookkeeping.
    pub async fn complete(
        &mut self,
        cursor: DateTime<Utc>,
        processed: i64,
        pool: &PgPool,
    ) -> Result<()> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE indexing_states
            SET status = 'completed',
                last_indexed_at = $2,
                total_indexed = total_indexed + $3,
                error_message = NULL,
                retry_count = 0,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(cursor)
        .bind(processed)
        .fetch_one(pool)
        .await?;

        *self = updated;
        Ok(())
    }

    /// Mark completed with a note but no progress, for the "feature not
    /// available upstream" terminal case.
    pub async fn complete_with_note(
        &mut self,
        cursor: DateTime<Utc>,
        note: &str,
        pool: &PgPool,
    ) -> Result<()> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE indexing_states
            SET status = 'completed',
                last_indexed_at = $2,
                error_message = $3,
                retry_count = 0,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(cursor)
        .bind(note)
        .fetch_one(pool)
        .await?;

        *self = updated;
        Ok(())
    }

    /// Return a running pair to pending without touching the retry budget.
    /// Used when a run defers itself mid-window on rate limiting; the
    /// deferral is not a failure.
    pub async fn release(&mut self, pool: &PgPool) -> Result<()> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE indexing_states
            SET status = 'pending',
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .fetch_one(pool)
        .await?;

        *self = updated;
        Ok(())
    }

    /// Record a failed run.
    pub async fn fail(&mut self, error: &str, pool: &PgPool) -> Result<()> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE indexing_states
            SET status = 'error',
                error_message = $2,
                retry_count = retry_count + 1,
                updated_at = NOW()
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

    /// Record a permanent failure (permission denied). Exhausts the retry
    /// budget so the pair is not retried automatically.
    pub async fn fail_permanent(&mut self, error: &str, pool: &PgPool) -> Result<()> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE indexing_states
            SET status = 'error',
                error_message = $2,
                retry_count = max_retries,
                updated_at = NOW()
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

    /// Operator reset: back to a pristine pending row.
    pub async fn reset(&mut self, pool: &PgPool) -> Result<()> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE indexing_states
            SET status = 'pending',
                last_indexed_at = NULL,
                total_indexed = 0,
                error_message = NULL,
                retry_count = 0,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .fetch_one(pool)
        .await?;

        *self = updated;
        Ok(())
    }

    pub async fn find_for_repository(repository_id: i64, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM indexing_states WHERE repository_id = $1 ORDER BY entity_kind",
        )
        .bind(repository_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(entity: EntityKind) -> IndexingState {
        IndexingState {
            id: Uuid::new_v4(),
            repository_id: 1,
            repository_full_name: "octo/widgets".to_string(),
            entity_kind: entity,
            status: IndexingStatus::Pending,
            last_indexed_at: None,
            last_run_at: None,
            retry_count: 0,
            max_retries: 5,
            batch_size_days: entity.default_batch_days(),
            error_message: None,
            total_indexed: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn should_run_denies_while_running() {
        let mut state = sample(EntityKind::Commits);
        state.status = IndexingStatus::Running;
        assert!(!state.should_run(Utc::now()));
    }

    #[test]
    fn should_run_denies_within_min_interval() {
        let now = at("2024-06-01T12:00:00Z");
        let mut state = sample(EntityKind::Commits);
        state.last_run_at = Some(now - Duration::seconds(30));
        assert!(!state.should_run(now));

        state.last_run_at = Some(now - Duration::minutes(2));
        assert!(state.should_run(now));
    }

    #[test]
    fn should_run_denies_after_max_retries_in_error() {
        let mut state = sample(EntityKind::Commits);
        state.status = IndexingStatus::Error;
        state.retry_count = 5;
        assert!(!state.should_run(Utc::now()));

        state.retry_count = 4;
        assert!(state.should_run(Utc::now()));
    }

    #[test]
    fn codeql_denies_within_six_hours_of_a_full_fetch() {
        let now = at("2024-06-01T12:00:00Z");
        let mut state = sample(EntityKind::CodeqlVulnerabilities);
        state.status = IndexingStatus::Completed;
        state.last_indexed_at = Some(now - Duration::hours(2));
        assert!(!state.should_run(now));

        state.last_indexed_at = Some(now - Duration::hours(7));
        assert!(state.should_run(now));
    }

    #[test]
    fn first_backward_window_ends_at_now() {
        let now = at("2024-06-01T12:00:00Z");
        let state = sample(EntityKind::Commits);
        let window = state.next_window(now).unwrap();
        assert_eq!(window.until, now);
        assert_eq!(window.since, now - Duration::days(7));
    }

    #[test]
    fn backward_window_walks_older_from_the_cursor() {
        let now = at("2024-06-01T12:00:00Z");
        let cursor = at("2024-05-01T00:00:00Z");
        let mut state = sample(EntityKind::Deployments);
        state.last_indexed_at = Some(cursor);
        let window = state.next_window(now).unwrap();
        assert_eq!(window.until, cursor);
        assert_eq!(window.since, cursor - Duration::days(30));
    }

    #[test]
    fn first_forward_window_starts_at_genesis() {
        let now = at("2024-06-01T12:00:00Z");
        let state = sample(EntityKind::PullRequests);
        let window = state.next_window(now).unwrap();
        assert_eq!(window.since, genesis());
        assert_eq!(window.until, now);
    }

    #[test]
    fn forward_window_resumes_from_the_cursor() {
        let now = at("2024-06-01T12:00:00Z");
        let cursor = at("2024-05-20T00:00:00Z");
        let mut state = sample(EntityKind::Releases);
        state.last_indexed_at = Some(cursor);
        let window = state.next_window(now).unwrap();
        assert_eq!(window.since, cursor);
        assert_eq!(window.until, now);
    }

    #[test]
    fn snapshot_entities_have_no_window() {
        let state = sample(EntityKind::CodeqlVulnerabilities);
        assert!(state.next_window(Utc::now()).is_none());
    }
}
