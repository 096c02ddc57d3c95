//! Shared pipeline plumbing: the gate every entity run passes through
//! before touching entity endpoints.

use anyhow::Result;
use github::GitHubClient;

use crate::common::sanitize::assert_safe_repository_full_name;
use crate::common::EntityKind;
use crate::domains::indexing::models::{IndexingState, Repository};
use crate::domains::tokens::rate_limit::{check_rate_limit, RateGateDecision};
use crate::domains::tokens::TokenOperation;
use crate::kernel::IndexerDeps;

use super::outcome::{FollowUp, IndexOutcome};

pub(super) enum Gate {
    /// All checks passed and this worker won the `running` transition.
    Ready {
        repository: Repository,
        state: IndexingState,
        client: GitHubClient,
    },
    /// The run ends here with this outcome; no state was mutated except by
    /// the checks themselves.
    Done(Box<IndexOutcome>),
}

/// Run the common preamble: repository lookup, name validation, state
/// should-run check, credential resolution, rate-limit gate, and the
/// compare-and-set transition to `running`.
///
/// Ordering matters: the rate gate runs before `begin` so a deferral leaves
/// status and retry_count untouched, and only the winner of the CAS reaches
/// entity endpoints.
pub(super) async fn open_gate(
    deps: &IndexerDeps,
    repository_id: i64,
    entity: EntityKind,
    operation: TokenOperation,
) -> Result<Gate> {
    let Some(repository) = Repository::find_by_id(repository_id, &deps.db_pool).await? else {
        tracing::warn!(repository_id, "repository no longer exists, skipping");
        return Ok(Gate::Done(Box::new(IndexOutcome::Skipped {
            repository_id,
            reason: format!("repository {} no longer exists", repository_id),
        })));
    };

    assert_safe_repository_full_name(&repository.full_name)?;

    let mut state = IndexingState::get_or_create(
        repository_id,
        &repository.full_name,
        entity,
        &deps.db_pool,
    )
    .await?;

    let now = deps.clock.now();
    if !state.should_run(now) {
        tracing::info!(
            repository = %repository.full_name,
            entity = entity.as_str(),
            status = ?state.status,
            "indexing should not proceed (running, too recent, or max retries exceeded)"
        );
        return Ok(Gate::Done(Box::new(IndexOutcome::Skipped {
            repository_id,
            reason: "already running, too recent, or max retries exceeded".to_string(),
        })));
    }

    let resolved = deps
        .tokens
        .token_for_repository(&repository.full_name, repository.owner_id, operation)
        .await?;
    let Some(resolved) = resolved else {
        return Ok(Gate::Done(Box::new(IndexOutcome::Skipped {
            repository_id,
            reason: "no GitHub token available".to_string(),
        })));
    };

    let client = deps.github_client(Some(resolved.token));

    if let RateGateDecision::Defer {
        remaining,
        reset_at,
        next_run,
    } = check_rate_limit(&client, entity, now).await
    {
        tracing::warn!(
            repository = %repository.full_name,
            entity = entity.as_str(),
            remaining,
            reset_at = %reset_at,
            "rate limit low, deferring to {}",
            next_run
        );
        return Ok(Gate::Done(Box::new(IndexOutcome::RateLimited {
            repository_id,
            scheduled_for: next_run,
            follow_up: FollowUp {
                entity,
                repository_id,
                run_at: next_run,
                retry: true,
            },
        })));
    }

    if !state.begin(now, &deps.db_pool).await? {
        tracing::info!(
            repository = %repository.full_name,
            entity = entity.as_str(),
            "another worker holds this pair"
        );
        return Ok(Gate::Done(Box::new(IndexOutcome::Skipped {
            repository_id,
            reason: "another worker is already indexing this pair".to_string(),
        })));
    }

    Ok(Gate::Ready {
        repository,
        state,
        client,
    })
}

/// Fold a GitHub error into state + outcome at the window level.
///
/// Rate limiting mid-window is a deferral, not a failure: the pair is
/// released back to pending with its retry budget untouched and a `_retry`
/// schedule is requested at the upstream reset. Permission denials exhaust
/// the budget; everything else counts one retry.
pub(super) async fn fail_with(
    deps: &IndexerDeps,
    state: &mut IndexingState,
    repository_id: i64,
    error: &github::GitHubError,
) -> Result<IndexOutcome> {
    let message = error.to_string();
    match error {
        github::GitHubError::RateLimited { reset_at, .. } => {
            let follow_up = FollowUp::rate_limit_retry(
                state.entity_kind,
                repository_id,
                *reset_at,
                deps.clock.now(),
            );
            state.release(&deps.db_pool).await?;
            tracing::warn!(
                repository = %state.repository_full_name,
                entity = state.entity_kind.as_str(),
                "rate limited mid-window, deferring to {}",
                follow_up.run_at
            );
            Ok(IndexOutcome::RateLimited {
                repository_id,
                scheduled_for: follow_up.run_at,
                follow_up,
            })
        }
        github::GitHubError::PermissionDenied { .. } => {
            state.fail_permanent(&message, &deps.db_pool).await?;
            Ok(IndexOutcome::Failed {
                repository_id,
                error: message,
            })
        }
        _ => {
            state.fail(&message, &deps.db_pool).await?;
            Ok(IndexOutcome::Failed {
                repository_id,
                error: message,
            })
        }
    }
}
