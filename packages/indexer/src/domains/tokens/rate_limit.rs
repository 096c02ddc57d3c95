//! The rate-limit gate.
//!
//! Before an expensive pipeline run the worker probes `/rate_limit` and
//! compares the remaining core budget against the entity's threshold. Below
//! threshold the run defers itself to after the upstream reset; a worker is
//! never left blocking on a reset.

use chrono::{DateTime, Utc};
use github::GitHubClient;

use crate::common::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateGateDecision {
    Proceed,
    /// Remaining budget is below threshold; re-run at `next_run` (upstream
    /// reset plus the per-entity slack).
    Defer {
        remaining: i64,
        reset_at: DateTime<Utc>,
        next_run: DateTime<Utc>,
    },
}

/// Pure decision over a snapshot; the async wrapper feeds it live data.
pub fn decide(
    entity: EntityKind,
    remaining: i64,
    reset_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> RateGateDecision {
    if remaining < entity.rate_limit_threshold() {
        let reset_at = reset_at.max(now);
        RateGateDecision::Defer {
            remaining,
            reset_at,
            next_run: reset_at + entity.rate_limit_slack(),
        }
    } else {
        RateGateDecision::Proceed
    }
}

/// Probe the rate limit for `client`'s credential. A failed probe proceeds:
/// the budget check is protective, not load-bearing, and the pipeline's own
/// calls will surface hard failures.
pub async fn check_rate_limit(
    client: &GitHubClient,
    entity: EntityKind,
    now: DateTime<Utc>,
) -> RateGateDecision {
    match client.rate_limit().await {
        Ok(snapshot) => {
            let reset_at = snapshot.reset_at().unwrap_or(now);
            decide(entity, snapshot.remaining, reset_at, now)
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not check rate limit, proceeding anyway");
            RateGateDecision::Proceed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn proceeds_at_or_above_threshold() {
        let now = at("2024-06-01T12:00:00Z");
        assert_eq!(
            decide(EntityKind::Commits, 100, now, now),
            RateGateDecision::Proceed
        );
        assert_eq!(
            decide(EntityKind::Releases, 20, now, now),
            RateGateDecision::Proceed
        );
    }

    #[test]
    fn defers_below_threshold_with_default_slack() {
        let now = at("2024-06-01T12:00:00Z");
        let reset = now + Duration::minutes(30);
        let decision = decide(EntityKind::PullRequests, 10, reset, now);
        match decision {
            RateGateDecision::Defer {
                remaining,
                reset_at,
                next_run,
            } => {
                assert_eq!(remaining, 10);
                assert_eq!(reset_at, reset);
                assert_eq!(next_run, reset + Duration::minutes(5));
            }
            RateGateDecision::Proceed => panic!("expected defer"),
        }
    }

    #[test]
    fn releases_and_codeql_use_ten_minute_slack() {
        let now = at("2024-06-01T12:00:00Z");
        let reset = now + Duration::minutes(30);
        for entity in [EntityKind::Releases, EntityKind::CodeqlVulnerabilities] {
            match decide(entity, 1, reset, now) {
                RateGateDecision::Defer { next_run, .. } => {
                    assert_eq!(next_run, reset + Duration::minutes(10));
                }
                RateGateDecision::Proceed => panic!("expected defer"),
            }
        }
    }

    #[test]
    fn past_reset_times_are_clamped_to_now() {
        let now = at("2024-06-01T12:00:00Z");
        let stale_reset = now - Duration::minutes(5);
        match decide(EntityKind::Commits, 1, stale_reset, now) {
            RateGateDecision::Defer {
                reset_at, next_run, ..
            } => {
                assert_eq!(reset_at, now);
                assert!(next_run >= now + Duration::minutes(5));
            }
            RateGateDecision::Proceed => panic!("expected defer"),
        }
    }
}
