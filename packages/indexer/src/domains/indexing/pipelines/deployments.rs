//! Deployment pipeline.
//!
//! Walks backward like commits. The deployments endpoint has no server-side
//! date filter, so pages are filtered client-side on `created_at` and the
//! scan stops once entries fall below the window. Status histories are
//! re-fetched only when the persisted record needs it: new record, empty
//! list, non-terminal tail, or a moved upstream `updated_at`.

use anyhow::Result;
use std::time::Duration as StdDuration;

use crate::common::EntityKind;
use crate::domains::indexing::models::deployment::NewDeployment;
use crate::domains::indexing::models::{Deployment, Repository};
use crate::domains::tokens::TokenOperation;
use crate::kernel::IndexerDeps;

use super::outcome::{FollowUp, IndexOutcome, IndexReport};
use super::support::{fail_with, open_gate, Gate};

const ENTITY: EntityKind = EntityKind::Deployments;

const INTER_PAGE_DELAY: StdDuration = StdDuration::from_millis(100);

pub async fn index_deployments(deps: &IndexerDeps, repository_id: i64) -> Result<IndexOutcome> {
    let (repository, mut state, client) =
        match open_gate(deps, repository_id, ENTITY, TokenOperation::PrivateRepos).await? {
            Gate::Ready {
                repository,
                state,
                client,
            } => (repository, state, client),
            Gate::Done(outcome) => return Ok(*outcome),
        };

    let window = state
        .next_window(deps.clock.now())
        .expect("deployments walk backward windows");

    tracing::info!(
        repository = %repository.full_name,
        since = %window.since,
        until = %window.until,
        "indexing deployments window"
    );

    let mut candidates = Vec::new();
    let mut older_exists = false;
    let mut page = 1u32;

    'pages: loop {
        let batch = match client
            .list_deployments(repository.owner(), repository.repo(), page)
            .await
        {
            Ok(batch) => batch,
            Err(e) => return fail_with(deps, &mut state, repository_id, &e).await,
        };

        if batch.is_empty() {
            break;
        }
        let batch_len = batch.len();

        for deployment in batch {
            let Some(created_at) = deployment.created_at else {
                continue;
            };
            if created_at < window.since {
                // Listing is newest-first; older history remains for the
                // next backward window.
                older_exists = true;
                break 'pages;
            }
            if window.contains(created_at) {
                candidates.push(deployment);
            }
        }

        if batch_len < github::PER_PAGE as usize {
            break;
        }
        page += 1;
        if page > ENTITY.page_cap() {
            tracing::warn!(repository = %repository.full_name, "hit deployment page cap");
            break;
        }

        tokio::time::sleep(INTER_PAGE_DELAY).await;
    }

    let mut errors = Vec::new();
    let mut processed = 0i64;

    for deployment in &candidates {
        match upsert_one(deps, &client, &repository, deployment).await {
            Ok(()) => processed += 1,
            Err(e) => {
                tracing::warn!(deployment_id = deployment.id, error = %e, "failed to process deployment");
                errors.push(format!("deployment {}: {}", deployment.id, e));
            }
        }
    }

    state
        .complete(window.since, processed, &deps.db_pool)
        .await?;

    let follow_up = older_exists.then(|| FollowUp {
        entity: ENTITY,
        repository_id,
        run_at: deps.clock.now() + ENTITY.follow_up_delay(),
        retry: false,
    });

    Ok(IndexOutcome::Success(IndexReport {
        repository_id,
        repository_full_name: repository.full_name.clone(),
        entity: ENTITY,
        processed,
        date_range: Some(window),
        has_more: older_exists,
        errors,
        note: None,
        follow_up,
    }))
}

async fn upsert_one(
    deps: &IndexerDeps,
    client: &github::GitHubClient,
    repository: &Repository,
    wire: &github::Deployment,
) -> Result<()> {
    let new = NewDeployment {
        deployment_id: wire.id,
        repository_full_name: repository.full_name.clone(),
        environment: wire.environment.clone().unwrap_or_default(),
        creator: wire
            .creator
            .as_ref()
            .map(|a| a.login.clone())
            .unwrap_or_default(),
        created_at: wire.created_at,
        updated_at: wire.updated_at,
        payload: wire.payload.clone(),
    };

    // Refresh decision looks at what is already persisted, before the
    // upsert overwrites updated_at.
    let needs_refresh = match Deployment::find_by_deployment_id(wire.id, &deps.db_pool).await? {
        Some(existing) => existing.statuses_need_refresh(wire.updated_at),
        None => true,
    };

    let mut stored = Deployment::upsert(&new, &deps.db_pool).await?;

    if needs_refresh {
        let statuses = client
            .list_deployment_statuses(repository.owner(), repository.repo(), wire.id)
            .await
            .unwrap_or_default();
        // Upstream returns newest-first; store oldest-first so the list tail
        // is the latest state.
        let mut statuses = statuses;
        statuses.reverse();
        stored
            .set_statuses(serde_json::to_value(&statuses)?, &deps.db_pool)
            .await?;
    }

    Ok(())
}
