//! Job handlers and fan-out tasks.
//!
//! The queue boundary pins a single typed signature for per-repo work:
//! `{ repository_id: i64 }`. Handlers run a pipeline, then act on the
//! returned follow-up intent by upserting the canonically-named schedule.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::common::types::{canonical_task_name, EntityKind};
use crate::config::IndexingService;
use crate::domains::git_local;
use crate::domains::indexing::models::{IndexingState, Repository};
use crate::domains::indexing::pipelines::{
    self,
    outcome::{FanOutResult, FanOutSummary},
    IndexOutcome,
};
use crate::kernel::jobs::{enqueue_command, schedule_command, CommandMeta, JobQueue, JobRegistry};
use crate::kernel::IndexerDeps;

// ============================================================================
// Commands
// ============================================================================

/// Per-repository indexing command. Serializes to exactly
/// `{"repository_id": N}`; entity and retry flag live in the job type and
/// canonical name.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndexEntityCommand {
    pub repository_id: i64,
    #[serde(skip)]
    pub entity: EntityKind,
    #[serde(skip)]
    pub retry: bool,
}

/// The typed argument struct handlers receive back from the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexRepositoryArgs {
    pub repository_id: i64,
}

pub fn job_type_for(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::Commits => "index_commits",
        EntityKind::PullRequests => "index_pull_requests",
        EntityKind::Releases => "index_releases",
        EntityKind::Deployments => "index_deployments",
        EntityKind::CodeqlVulnerabilities => "index_codeql",
    }
}

pub fn fan_out_job_type(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::Commits => "index_all_commits",
        EntityKind::PullRequests => "index_all_pull_requests",
        EntityKind::Releases => "index_all_releases",
        EntityKind::Deployments => "index_all_deployments",
        EntityKind::CodeqlVulnerabilities => "index_all_codeql",
    }
}

impl CommandMeta for IndexEntityCommand {
    fn job_type(&self) -> &'static str {
        job_type_for(self.entity)
    }

    fn name(&self) -> String {
        canonical_task_name(self.entity, self.repository_id, self.retry)
    }
}

/// Fan-out command; carries no arguments.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FanOutCommand {
    #[serde(skip)]
    pub entity: EntityKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NoArgs {}

impl CommandMeta for FanOutCommand {
    fn job_type(&self) -> &'static str {
        fan_out_job_type(self.entity)
    }

    fn name(&self) -> String {
        fan_out_job_type(self.entity).to_string()
    }
}

/// Enqueue the fan-out task for an entity kind (called by the cron layer).
pub async fn enqueue_fan_out(queue: &dyn JobQueue, entity: EntityKind) -> Result<()> {
    enqueue_command(queue, &FanOutCommand { entity }).await?;
    Ok(())
}

// ============================================================================
// Per-repo handlers
// ============================================================================

/// Run the pipeline for one (repo, entity) and apply its follow-up intent.
pub async fn run_entity_indexing(
    entity: EntityKind,
    deps: &IndexerDeps,
    queue: &dyn JobQueue,
    repository_id: i64,
) -> Result<()> {
    let outcome = match entity {
        EntityKind::Commits => {
            if deps.config.indexing_service == IndexingService::GitLocal {
                git_local::sync::index_commits_git_local(deps, repository_id).await?
            } else {
                pipelines::commits::index_commits(deps, repository_id).await?
            }
        }
        EntityKind::PullRequests => {
            pipelines::pull_requests::index_pull_requests(deps, repository_id).await?
        }
        EntityKind::Releases => pipelines::releases::index_releases(deps, repository_id).await?,
        EntityKind::Deployments => {
            pipelines::deployments::index_deployments(deps, repository_id).await?
        }
        EntityKind::CodeqlVulnerabilities => {
            pipelines::codeql::index_codeql(deps, repository_id).await?
        }
    };

    apply_follow_up(queue, &outcome).await?;

    match &outcome {
        IndexOutcome::Success(report) => {
            tracing::info!(
                entity = entity.as_str(),
                repository = %report.repository_full_name,
                processed = report.processed,
                has_more = report.has_more,
                item_errors = report.errors.len(),
                "indexing run finished"
            );
            Ok(())
        }
        IndexOutcome::Skipped { reason, .. } => {
            tracing::info!(entity = entity.as_str(), repository_id, reason, "indexing skipped");
            Ok(())
        }
        IndexOutcome::CloneSkipped { reason, .. } => {
            tracing::warn!(entity = entity.as_str(), repository_id, reason, "clone skipped");
            Ok(())
        }
        IndexOutcome::RateLimited { scheduled_for, .. } => {
            tracing::warn!(
                entity = entity.as_str(),
                repository_id,
                scheduled_for = %scheduled_for,
                "rate limited, retry scheduled"
            );
            Ok(())
        }
        IndexOutcome::Failed { error, .. } => Err(anyhow!("indexing failed: {}", error)),
    }
}

/// Turn an outcome's follow-up intent into a scheduled job, upserting the
/// canonical name so repeated defers update one row.
pub async fn apply_follow_up(queue: &dyn JobQueue, outcome: &IndexOutcome) -> Result<()> {
    let Some(follow_up) = outcome.follow_up() else {
        return Ok(());
    };

    let command = IndexEntityCommand {
        repository_id: follow_up.repository_id,
        entity: follow_up.entity,
        retry: follow_up.retry,
    };
    schedule_command(queue, &command, follow_up.run_at).await?;

    tracing::info!(
        name = %follow_up.task_name(),
        run_at = %follow_up.run_at,
        "scheduled follow-up"
    );
    Ok(())
}

// ============================================================================
// Fan-out
// ============================================================================

/// Enqueue the per-repo task for every repository. Scheduling failures are
/// collected into the summary, never raised.
pub async fn fan_out(
    entity: EntityKind,
    deps: &IndexerDeps,
    queue: &dyn JobQueue,
) -> Result<FanOutSummary> {
    // CodeQL only runs against repositories whose commit backfill finished;
    // everything else sweeps all registered repositories.
    let repositories = if entity == EntityKind::CodeqlVulnerabilities {
        Repository::find_indexed(&deps.db_pool).await?
    } else {
        Repository::find_all(&deps.db_pool).await?
    };
    let mut summary = FanOutSummary {
        total_repositories: repositories.len(),
        ..Default::default()
    };

    for repository in repositories {
        if entity == EntityKind::CodeqlVulnerabilities
            && !codeql_due(deps, &repository).await.unwrap_or(true)
        {
            tracing::info!(repository = %repository.full_name, "skipping CodeQL fan-out, recently analyzed");
            continue;
        }

        let command = IndexEntityCommand {
            repository_id: repository.id,
            entity,
            retry: false,
        };
        match enqueue_command(queue, &command).await {
            Ok(_) => {
                summary.successfully_scheduled += 1;
                summary.results.push(FanOutResult {
                    repository_id: repository.id,
                    repository_full_name: repository.full_name.clone(),
                    status: "scheduled",
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!(
                    repository = %repository.full_name,
                    error = %e,
                    "failed to schedule indexing"
                );
                summary.failed_to_schedule += 1;
                summary.results.push(FanOutResult {
                    repository_id: repository.id,
                    repository_full_name: repository.full_name.clone(),
                    status: "failed",
                    error: Some(e.to_string()),
                });
            }
        }
    }

    tracing::info!(
        entity = entity.as_str(),
        total = summary.total_repositories,
        scheduled = summary.successfully_scheduled,
        failed = summary.failed_to_schedule,
        "fan-out completed"
    );
    Ok(summary)
}

/// Daily CodeQL fan-out only re-enqueues repositories whose last full fetch
/// is older than a day.
async fn codeql_due(deps: &IndexerDeps, repository: &Repository) -> Result<bool> {
    let states = IndexingState::find_for_repository(repository.id, &deps.db_pool).await?;
    let last = states
        .iter()
        .find(|s| s.entity_kind == EntityKind::CodeqlVulnerabilities)
        .and_then(|s| s.last_indexed_at);

    Ok(match last {
        Some(last_indexed) => deps.clock.now() - last_indexed > Duration::days(1),
        None => true,
    })
}

// ============================================================================
// Registry wiring
// ============================================================================

/// Build the registry mapping every job type to its handler. The queue is
/// captured so handlers can schedule follow-ups.
pub fn build_job_registry(queue: Arc<dyn JobQueue>) -> JobRegistry {
    let mut registry = JobRegistry::new();

    for entity in EntityKind::ALL {
        let per_repo_queue = queue.clone();
        registry.register::<IndexRepositoryArgs, _, _>(job_type_for(entity), move |args, deps| {
            let queue = per_repo_queue.clone();
            async move {
                run_entity_indexing(entity, &deps, queue.as_ref(), args.repository_id).await
            }
        });

        let fan_out_queue = queue.clone();
        registry.register::<NoArgs, _, _>(fan_out_job_type(entity), move |_args, deps| {
            let queue = fan_out_queue.clone();
            async move {
                fan_out(entity, &deps, queue.as_ref()).await?;
                Ok(())
            }
        });
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::common::DateRange;
    use crate::domains::indexing::pipelines::{FollowUp, IndexReport};
    use crate::kernel::jobs::queue::testing::MemoryJobQueue;

    fn success_with_follow_up(run_at: chrono::DateTime<Utc>) -> IndexOutcome {
        IndexOutcome::Success(IndexReport {
            repository_id: 9,
            repository_full_name: "octo/widgets".to_string(),
            entity: EntityKind::Commits,
            processed: 12,
            date_range: Some(DateRange {
                since: run_at - Duration::days(7),
                until: run_at,
            }),
            has_more: true,
            errors: Vec::new(),
            note: None,
            follow_up: Some(FollowUp {
                entity: EntityKind::Commits,
                repository_id: 9,
                run_at,
                retry: false,
            }),
        })
    }

    #[test]
    fn per_repo_command_serializes_to_the_typed_signature() {
        let command = IndexEntityCommand {
            repository_id: 42,
            entity: EntityKind::Deployments,
            retry: true,
        };
        let value = serde_json::to_value(command).unwrap();
        assert_eq!(value, serde_json::json!({"repository_id": 42}));
        assert_eq!(command.name(), "deployment_indexing_repo_42_retry");
        assert_eq!(command.job_type(), "index_deployments");
    }

    #[tokio::test]
    async fn follow_up_is_scheduled_under_the_canonical_name() {
        let queue = MemoryJobQueue::new();
        let run_at = Utc::now() + Duration::minutes(1);

        apply_follow_up(&queue, &success_with_follow_up(run_at))
            .await
            .unwrap();

        let job = queue.job_named("commit_indexing_repo_9").unwrap();
        assert_eq!(job.job_type, "index_commits");
        assert_eq!(job.next_run_at, Some(run_at));
    }

    #[tokio::test]
    async fn repeated_rate_limit_defers_keep_exactly_one_retry_schedule() {
        let queue = MemoryJobQueue::new();

        for minutes in [30, 60, 90] {
            let scheduled_for = Utc::now() + Duration::minutes(minutes);
            let outcome = IndexOutcome::RateLimited {
                repository_id: 9,
                scheduled_for,
                follow_up: FollowUp {
                    entity: EntityKind::PullRequests,
                    repository_id: 9,
                    run_at: scheduled_for,
                    retry: true,
                },
            };
            apply_follow_up(&queue, &outcome).await.unwrap();
        }

        assert_eq!(
            queue.scheduled_names(),
            vec!["pullrequest_indexing_repo_9_retry".to_string()]
        );
    }

    #[tokio::test]
    async fn outcomes_without_intent_schedule_nothing() {
        let queue = MemoryJobQueue::new();
        apply_follow_up(
            &queue,
            &IndexOutcome::Skipped {
                repository_id: 9,
                reason: "too soon".to_string(),
            },
        )
        .await
        .unwrap();
        assert!(queue.scheduled_names().is_empty());
    }

    #[test]
    fn registry_covers_every_entity_and_fan_out() {
        let registry = build_job_registry(Arc::new(MemoryJobQueue::new()));
        for entity in EntityKind::ALL {
            assert!(registry.is_registered(job_type_for(entity)));
            assert!(registry.is_registered(fan_out_job_type(entity)));
        }
    }
}
