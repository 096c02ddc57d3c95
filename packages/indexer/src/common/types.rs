//! Entity kinds and the per-kind scheduling constants.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The entity families the indexer tracks per repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entity_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Commits,
    PullRequests,
    Releases,
    Deployments,
    CodeqlVulnerabilities,
}

/// How `last_indexed_at` is interpreted for an entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorDirection {
    /// Cursor is the oldest point reached; windows walk backward from it.
    Backward,
    /// Cursor is the newest point reached; windows extend from it to now.
    Forward,
    /// Cursor is the completion time of the last full fetch; there is no
    /// window, every run re-reads the complete upstream set.
    Snapshot,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Commits,
        EntityKind::PullRequests,
        EntityKind::Releases,
        EntityKind::Deployments,
        EntityKind::CodeqlVulnerabilities,
    ];

    /// Short name used in task names, logs and the state table.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Commits => "commits",
            EntityKind::PullRequests => "pull_requests",
            EntityKind::Releases => "releases",
            EntityKind::Deployments => "deployments",
            EntityKind::CodeqlVulnerabilities => "codeql_vulnerabilities",
        }
    }

    /// Singular prefix used in canonical task names.
    pub fn task_prefix(&self) -> &'static str {
        match self {
            EntityKind::Commits => "commit",
            EntityKind::PullRequests => "pullrequest",
            EntityKind::Releases => "release",
            EntityKind::Deployments => "deployment",
            EntityKind::CodeqlVulnerabilities => "codeql",
        }
    }

    pub fn cursor_direction(&self) -> CursorDirection {
        match self {
            EntityKind::Commits | EntityKind::Deployments => CursorDirection::Backward,
            EntityKind::PullRequests | EntityKind::Releases => CursorDirection::Forward,
            EntityKind::CodeqlVulnerabilities => CursorDirection::Snapshot,
        }
    }

    /// Width of one backfill window in days.
    pub fn default_batch_days(&self) -> i32 {
        match self {
            EntityKind::Commits => 7,
            EntityKind::PullRequests | EntityKind::Deployments => 30,
            EntityKind::Releases => 90,
            EntityKind::CodeqlVulnerabilities => 365,
        }
    }

    /// Minimum spacing between runs for one (repo, entity) pair.
    pub fn min_run_interval(&self) -> Duration {
        match self {
            EntityKind::CodeqlVulnerabilities => Duration::hours(6),
            _ => Duration::minutes(1),
        }
    }

    /// Core-remaining threshold below which a run defers instead of starting.
    pub fn rate_limit_threshold(&self) -> i64 {
        match self {
            EntityKind::Commits => 100,
            EntityKind::PullRequests => 50,
            EntityKind::CodeqlVulnerabilities => 30,
            EntityKind::Releases | EntityKind::Deployments => 20,
        }
    }

    /// Slack added after the upstream reset time when deferring.
    pub fn rate_limit_slack(&self) -> Duration {
        match self {
            EntityKind::Releases | EntityKind::CodeqlVulnerabilities => Duration::minutes(10),
            _ => Duration::minutes(5),
        }
    }

    /// Delay before a follow-up window when more history remains.
    pub fn follow_up_delay(&self) -> Duration {
        match self {
            EntityKind::Commits => Duration::minutes(1),
            EntityKind::PullRequests => Duration::minutes(3),
            _ => Duration::minutes(5),
        }
    }

    /// Hard page cap per run, against runaway pagination loops.
    pub fn page_cap(&self) -> u32 {
        match self {
            EntityKind::Commits => 20,
            EntityKind::PullRequests => 50,
            EntityKind::Releases | EntityKind::Deployments => 20,
            EntityKind::CodeqlVulnerabilities => 50,
        }
    }
}

/// Canonical name for a per-repo indexing task. Retries after a rate-limit
/// defer use a distinct `_retry` name so a deferral never clobbers the
/// regular follow-up chain.
pub fn canonical_task_name(entity: EntityKind, repository_id: i64, retry: bool) -> String {
    if retry {
        format!("{}_indexing_repo_{}_retry", entity.task_prefix(), repository_id)
    } else {
        format!("{}_indexing_repo_{}", entity.task_prefix(), repository_id)
    }
}

/// Earliest point forward pipelines start from when no cursor exists.
pub fn genesis() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2010-01-01T00:00:00Z")
        .expect("genesis timestamp is valid")
        .with_timezone(&Utc)
}

/// A half-open date window processed by one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since <= at && at <= self.until
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_match_the_scheduler_contract() {
        assert_eq!(
            canonical_task_name(EntityKind::Commits, 42, false),
            "commit_indexing_repo_42"
        );
        assert_eq!(
            canonical_task_name(EntityKind::PullRequests, 42, true),
            "pullrequest_indexing_repo_42_retry"
        );
        assert_eq!(
            canonical_task_name(EntityKind::CodeqlVulnerabilities, 7, false),
            "codeql_indexing_repo_7"
        );
        assert_eq!(
            canonical_task_name(EntityKind::Deployments, 7, true),
            "deployment_indexing_repo_7_retry"
        );
    }

    #[test]
    fn batch_sizes_are_per_entity() {
        assert_eq!(EntityKind::Commits.default_batch_days(), 7);
        assert_eq!(EntityKind::PullRequests.default_batch_days(), 30);
        assert_eq!(EntityKind::Deployments.default_batch_days(), 30);
        assert_eq!(EntityKind::Releases.default_batch_days(), 90);
        assert_eq!(EntityKind::CodeqlVulnerabilities.default_batch_days(), 365);
    }

    #[test]
    fn rate_thresholds_are_per_entity() {
        assert_eq!(EntityKind::Commits.rate_limit_threshold(), 100);
        assert_eq!(EntityKind::PullRequests.rate_limit_threshold(), 50);
        assert_eq!(EntityKind::CodeqlVulnerabilities.rate_limit_threshold(), 30);
        assert_eq!(EntityKind::Releases.rate_limit_threshold(), 20);
        assert_eq!(EntityKind::Deployments.rate_limit_threshold(), 20);
    }

    #[test]
    fn cursor_directions_are_explicit() {
        assert_eq!(
            EntityKind::Commits.cursor_direction(),
            CursorDirection::Backward
        );
        assert_eq!(
            EntityKind::Deployments.cursor_direction(),
            CursorDirection::Backward
        );
        assert_eq!(
            EntityKind::PullRequests.cursor_direction(),
            CursorDirection::Forward
        );
        assert_eq!(
            EntityKind::Releases.cursor_direction(),
            CursorDirection::Forward
        );
        assert_eq!(
            EntityKind::CodeqlVulnerabilities.cursor_direction(),
            CursorDirection::Snapshot
        );
    }

    #[test]
    fn date_range_contains_is_inclusive() {
        let range = DateRange {
            since: genesis(),
            until: genesis() + Duration::days(1),
        };
        assert!(range.contains(genesis()));
        assert!(range.contains(genesis() + Duration::days(1)));
        assert!(!range.contains(genesis() - Duration::seconds(1)));
    }
}
