//! Pull request pipeline.
//!
//! Forward incremental: the cursor is the newest point reached, each run
//! covers `[cursor, now]`. Listing is sorted created-descending so the scan
//! stops as soon as a page crosses below the window.

use anyhow::Result;
use std::time::Duration as StdDuration;

use crate::common::{DateRange, EntityKind};
use crate::domains::indexing::models::pull_request::NewPullRequest;
use crate::domains::indexing::models::{PullRequest, Repository};
use crate::domains::tokens::TokenOperation;
use crate::kernel::IndexerDeps;

use super::outcome::{IndexOutcome, IndexReport};
use super::support::{fail_with, open_gate, Gate};

const ENTITY: EntityKind = EntityKind::PullRequests;

/// Pause between list pages to smooth request bursts.
const INTER_PAGE_DELAY: StdDuration = StdDuration::from_millis(100);

pub async fn index_pull_requests(deps: &IndexerDeps, repository_id: i64) -> Result<IndexOutcome> {
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
        .expect("pull requests use forward windows");

    tracing::info!(
        repository = %repository.full_name,
        since = %window.since,
        until = %window.until,
        "indexing pull requests window"
    );

    let mut errors = Vec::new();
    let mut processed = 0i64;
    let mut page = 1u32;

    'pages: loop {
        let batch = match client
            .list_pulls(repository.owner(), repository.repo(), page)
            .await
        {
            Ok(batch) => batch,
            Err(e) => return fail_with(deps, &mut state, repository_id, &e).await,
        };

        if batch.is_empty() {
            break;
        }
        let batch_len = batch.len();

        for summary in batch {
            let Some(created_at) = summary.created_at else {
                continue;
            };
            if created_at < window.since {
                // Sorted created-desc: everything after this is older.
                tracing::info!(
                    repository = %repository.full_name,
                    "reached pull requests older than {}, stopping",
                    window.since
                );
                break 'pages;
            }
            if !window.contains(created_at) {
                continue;
            }

            match upsert_one(deps, &client, &repository, summary.number, &window).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(number = summary.number, error = %e, "failed to process pull request");
                    errors.push(format!("pull request #{}: {}", summary.number, e));
                }
            }
        }

        if batch_len < github::PER_PAGE as usize {
            break;
        }
        page += 1;
        if page > ENTITY.page_cap() {
            tracing::warn!(repository = %repository.full_name, "hit pull request page cap");
            break;
        }

        tokio::time::sleep(INTER_PAGE_DELAY).await;
    }

    state
        .complete(window.until, processed, &deps.db_pool)
        .await?;

    Ok(IndexOutcome::Success(IndexReport {
        repository_id,
        repository_full_name: repository.full_name.clone(),
        entity: ENTITY,
        processed,
        date_range: Some(window),
        has_more: false,
        errors,
        note: None,
        follow_up: None,
    }))
}

/// Fetch the detail plus comment counts for one candidate and upsert it.
/// Returns false when the detail no longer falls inside the window.
async fn upsert_one(
    deps: &IndexerDeps,
    client: &github::GitHubClient,
    repository: &Repository,
    number: i64,
    window: &DateRange,
) -> Result<bool> {
    let detail = client
        .get_pull(repository.owner(), repository.repo(), number)
        .await?;

    match detail.created_at {
        Some(created_at) if window.contains(created_at) => {}
        _ => return Ok(false),
    }

    let review_comments_count = client
        .list_review_comments(repository.owner(), repository.repo(), number, 1)
        .await
        .map(|comments| comments.len() as i64)
        .unwrap_or(0);

    let comments_count = client
        .list_issue_comments(repository.owner(), repository.repo(), number, 1)
        .await
        .map(|comments| comments.len() as i64)
        .unwrap_or(0);

    let new = NewPullRequest {
        repository_full_name: repository.full_name.clone(),
        number: detail.number,
        title: detail.title.clone().unwrap_or_default(),
        author: actor_login(&detail.user),
        state: detail.state.clone().unwrap_or_default(),
        created_at: detail.created_at,
        updated_at: detail.updated_at,
        closed_at: detail.closed_at,
        merged_at: detail.merged_at,
        merged_by: actor_login(&detail.merged_by),
        requested_reviewers: detail
            .requested_reviewers
            .iter()
            .map(|a| a.login.clone())
            .collect(),
        assignees: detail.assignees.iter().map(|a| a.login.clone()).collect(),
        labels: detail.labels.iter().map(|l| l.name.clone()).collect(),
        commits_count: detail.commits,
        additions_count: detail.additions,
        deletions_count: detail.deletions,
        changed_files_count: detail.changed_files,
        review_comments_count,
        comments_count,
        url: detail.html_url.clone().unwrap_or_default(),
        payload: serde_json::to_value(&detail).ok(),
    };

    PullRequest::upsert(&new, &deps.db_pool).await?;
    Ok(true)
}

fn actor_login(actor: &Option<github::Actor>) -> String {
    actor.as_ref().map(|a| a.login.clone()).unwrap_or_default()
}
