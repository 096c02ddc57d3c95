//! Commit pipeline, API variant.
//!
//! Walks backward in `batch_size_days` windows from the oldest point
//! reached, pulling `/commits` pages and the per-commit detail for file
//! stats. An empty window means the backfill reached repository genesis:
//! the repository is marked indexed and KLOC freshness is evaluated.

use anyhow::Result;

use crate::common::EntityKind;
use crate::domains::git_local;
use crate::domains::indexing::classifier::classify_commit;
use crate::domains::indexing::models::commit::{FileChange, NewCommit};
use crate::domains::indexing::models::{Commit, Repository};
use crate::domains::tokens::TokenOperation;
use crate::kernel::IndexerDeps;

use super::outcome::{FollowUp, IndexOutcome, IndexReport};
use super::support::{fail_with, open_gate, Gate};

const ENTITY: EntityKind = EntityKind::Commits;

pub async fn index_commits(deps: &IndexerDeps, repository_id: i64) -> Result<IndexOutcome> {
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
        .expect("commits walk backward windows");

    tracing::info!(
        repository = %repository.full_name,
        since = %window.since,
        until = %window.until,
        "indexing commits window"
    );

    let mut summaries = Vec::new();
    let mut page = 1u32;
    loop {
        let batch = match client
            .list_commits(
                repository.owner(),
                repository.repo(),
                window.since,
                window.until,
                page,
            )
            .await
        {
            Ok(batch) => batch,
            Err(e) => return fail_with(deps, &mut state, repository_id, &e).await,
        };

        let batch_len = batch.len();
        summaries.extend(batch);

        if batch_len < github::PER_PAGE as usize {
            break;
        }
        page += 1;
        if page > ENTITY.page_cap() {
            tracing::warn!(repository = %repository.full_name, "hit commit page cap");
            break;
        }
    }

    let mut errors = Vec::new();
    let mut processed = 0i64;

    for summary in &summaries {
        match upsert_one(deps, &client, &repository, summary).await {
            Ok(()) => processed += 1,
            Err(e) => {
                tracing::warn!(sha = %summary.sha, error = %e, "failed to process commit");
                errors.push(format!("commit {}: {}", summary.sha, e));
            }
        }
    }

    let backfill_complete = summaries.is_empty();

    let follow_up = if backfill_complete {
        // No commits in this window: the walk reached repository genesis.
        Repository::mark_indexed(repository.id, &deps.db_pool).await?;
        tracing::info!(repository = %repository.full_name, "commit backfill complete, marked indexed");

        // KLOC clones into the repository's scratch dir; running it before
        // `complete` keeps the clone inside this pair's running section so
        // no other worker can touch the same directory.
        if let Err(e) = git_local::kloc::ensure_fresh_kloc(deps, &repository).await {
            tracing::warn!(repository = %repository.full_name, error = %e, "KLOC calculation skipped/failed");
        }
        None
    } else {
        Some(FollowUp {
            entity: ENTITY,
            repository_id,
            run_at: deps.clock.now() + ENTITY.follow_up_delay(),
            retry: false,
        })
    };

    state
        .complete(window.since, processed, &deps.db_pool)
        .await?;

    Ok(IndexOutcome::Success(IndexReport {
        repository_id,
        repository_full_name: repository.full_name.clone(),
        entity: ENTITY,
        processed,
        date_range: Some(window),
        has_more: !backfill_complete,
        errors,
        note: None,
        follow_up,
    }))
}

/// Fetch the detail for one commit and upsert it. Detail failures degrade
/// to the summary data with zeroed stats.
async fn upsert_one(
    deps: &IndexerDeps,
    client: &github::GitHubClient,
    repository: &Repository,
    summary: &github::CommitSummary,
) -> Result<()> {
    let (stats, files) = match client
        .get_commit(repository.owner(), repository.repo(), &summary.sha)
        .await
    {
        Ok(detail) => (detail.stats, detail.files),
        Err(e) => {
            tracing::warn!(sha = %summary.sha, error = %e, "commit detail unavailable, using summary");
            (None, Vec::new())
        }
    };

    let file_changes: Vec<FileChange> = files
        .iter()
        .map(|f| FileChange {
            filename: f.filename.clone(),
            additions: f.additions,
            deletions: f.deletions,
            changes: f.changes,
            status: f.status.clone().unwrap_or_else(|| "modified".to_string()),
        })
        .collect();

    let filenames: Vec<String> = file_changes.iter().map(|f| f.filename.clone()).collect();
    let commit_type = classify_commit(&summary.commit.message, &filenames);

    let author = summary.commit.author.clone().unwrap_or_default();
    let committer = summary.commit.committer.clone().unwrap_or_default();
    let (additions, deletions, total) = stats
        .map(|s| (s.additions, s.deletions, s.total))
        .unwrap_or((0, 0, 0));

    let new = NewCommit {
        repository_full_name: repository.full_name.clone(),
        sha: summary.sha.clone(),
        message: summary.commit.message.clone(),
        author_name: author.name.unwrap_or_default(),
        author_email: author.email.unwrap_or_default(),
        committer_name: committer.name.unwrap_or_default(),
        committer_email: committer.email.unwrap_or_default(),
        authored_date: author.date,
        committed_date: committer.date,
        additions,
        deletions,
        total_changes: total,
        files_changed: file_changes,
        commit_type: commit_type.to_string(),
    };

    Commit::upsert(&new, &deps.db_pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    #[test]
    fn three_windows_cover_twenty_days_of_history() {
        // A 20-day-old repository with batch_size 7 needs three windows
        // before the fourth fetch comes back empty.
        let batch = Duration::days(7);
        let history = Duration::days(20);
        let mut covered = Duration::zero();
        let mut windows = 0;
        while covered < history {
            covered = covered + batch;
            windows += 1;
        }
        assert_eq!(windows, 3);
    }
}
