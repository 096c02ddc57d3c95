//! Pipeline run outcomes.
//!
//! Outcomes are data, not control flow: a pipeline reports what happened
//! and, when more work remains, a follow-up intent. The task layer turns
//! intents into scheduled jobs; pipelines stay pure of scheduler calls.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::types::{canonical_task_name, DateRange, EntityKind};

/// Intent to run the same (repo, entity) again at a later time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUp {
    pub entity: EntityKind,
    pub repository_id: i64,
    pub run_at: DateTime<Utc>,
    /// Rate-limit deferrals use the distinct `_retry` canonical name.
    pub retry: bool,
}

impl FollowUp {
    pub fn task_name(&self) -> String {
        canonical_task_name(self.entity, self.repository_id, self.retry)
    }

    /// Deferral intent for a rate-limited run: the upstream reset (clamped
    /// to now when missing or stale) plus the entity's slack, under the
    /// `_retry` name.
    pub fn rate_limit_retry(
        entity: EntityKind,
        repository_id: i64,
        reset_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let reset = reset_at.unwrap_or(now).max(now);
        FollowUp {
            entity,
            repository_id,
            run_at: reset + entity.rate_limit_slack(),
            retry: true,
        }
    }
}

/// Result of one successful pipeline run.
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub repository_id: i64,
    pub repository_full_name: String,
    pub entity: EntityKind,
    pub processed: i64,
    pub date_range: Option<DateRange>,
    pub has_more: bool,
    /// Per-item failures that did not abort the window.
    pub errors: Vec<String>,
    /// Human-readable annotation ("CodeQL not available", ...).
    pub note: Option<String>,
    pub follow_up: Option<FollowUp>,
}

/// What a pipeline run produced.
#[derive(Debug, Clone)]
pub enum IndexOutcome {
    Success(IndexReport),
    /// Nothing to do: unknown repository, pair already running, or inside
    /// the minimum run interval.
    Skipped {
        repository_id: i64,
        reason: String,
    },
    /// Credential budget below threshold; a `_retry` schedule was requested
    /// instead of running.
    RateLimited {
        repository_id: i64,
        scheduled_for: DateTime<Utc>,
        follow_up: FollowUp,
    },
    /// The run failed; state carries the error and retry bookkeeping.
    Failed {
        repository_id: i64,
        error: String,
    },
    /// Local-clone terminal failure; not counted against retries.
    CloneSkipped {
        repository_id: i64,
        reason: String,
    },
}

impl IndexOutcome {
    /// The follow-up this outcome asks the scheduler to create, if any.
    pub fn follow_up(&self) -> Option<FollowUp> {
        match self {
            IndexOutcome::Success(report) => report.follow_up,
            IndexOutcome::RateLimited { follow_up, .. } => Some(*follow_up),
            _ => None,
        }
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            IndexOutcome::Success(_) => "success",
            IndexOutcome::Skipped { .. } => "skipped",
            IndexOutcome::RateLimited { .. } => "rate_limited",
            IndexOutcome::Failed { .. } => "failed",
            IndexOutcome::CloneSkipped { .. } => "clone_skipped",
        }
    }
}

/// Aggregate result of a fan-out task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FanOutSummary {
    pub total_repositories: usize,
    pub successfully_scheduled: usize,
    pub failed_to_schedule: usize,
    pub results: Vec<FanOutResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FanOutResult {
    pub repository_id: i64,
    pub repository_full_name: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn follow_up_names_use_the_canonical_scheme() {
        let regular = FollowUp {
            entity: EntityKind::Commits,
            repository_id: 3,
            run_at: Utc::now(),
            retry: false,
        };
        assert_eq!(regular.task_name(), "commit_indexing_repo_3");

        let retry = FollowUp {
            entity: EntityKind::Releases,
            repository_id: 3,
            run_at: Utc::now(),
            retry: true,
        };
        assert_eq!(retry.task_name(), "release_indexing_repo_3_retry");
    }

    #[test]
    fn rate_limit_retry_lands_after_the_reset_plus_slack() {
        let now = chrono::DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let reset = now + chrono::Duration::minutes(30);

        let follow_up = FollowUp::rate_limit_retry(EntityKind::Commits, 5, Some(reset), now);
        assert_eq!(follow_up.run_at, reset + chrono::Duration::minutes(5));
        assert!(follow_up.retry);
        assert_eq!(follow_up.task_name(), "commit_indexing_repo_5_retry");

        let follow_up = FollowUp::rate_limit_retry(EntityKind::Releases, 5, Some(reset), now);
        assert_eq!(follow_up.run_at, reset + chrono::Duration::minutes(10));
    }

    #[test]
    fn rate_limit_retry_clamps_missing_or_stale_resets_to_now() {
        let now = chrono::DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let follow_up = FollowUp::rate_limit_retry(EntityKind::PullRequests, 5, None, now);
        assert_eq!(follow_up.run_at, now + chrono::Duration::minutes(5));

        let stale = now - chrono::Duration::minutes(10);
        let follow_up = FollowUp::rate_limit_retry(EntityKind::PullRequests, 5, Some(stale), now);
        assert_eq!(follow_up.run_at, now + chrono::Duration::minutes(5));
    }

    #[test]
    fn only_success_and_rate_limited_carry_follow_ups() {
        let skipped = IndexOutcome::Skipped {
            repository_id: 1,
            reason: "already running".to_string(),
        };
        assert!(skipped.follow_up().is_none());

        let failed = IndexOutcome::Failed {
            repository_id: 1,
            error: "boom".to_string(),
        };
        assert!(failed.follow_up().is_none());
    }
}
