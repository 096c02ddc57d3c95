//! Local-clone commit pipeline.
//!
//! The alternative to the API commit pipeline, selected by
//! `INDEXING_SERVICE=git_local`. One run ingests the complete history:
//! clone, `git log --all --no-merges`, per-commit `git show --stat`,
//! classify, upsert. Terminal clone failures (missing repo, auth, pack
//! corruption) report `skipped` rather than burning retries. The scratch
//! clone is removed on success and failure alike.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::common::sanitize::assert_safe_repository_full_name;
use crate::common::EntityKind;
use crate::domains::indexing::classifier::classify_commit;
use crate::domains::indexing::models::commit::{FileChange, NewCommit};
use crate::domains::indexing::models::{Commit, IndexingState, Repository, SyncLog};
use crate::domains::indexing::pipelines::{IndexOutcome, IndexReport};
use crate::domains::tokens::TokenOperation;
use crate::kernel::IndexerDeps;

use super::git_service::{GitCommit, GitService};
use super::kloc;

#[derive(Debug, Default)]
struct SyncCounts {
    processed: i64,
    new: i64,
    updated: i64,
    skipped: i64,
    errors: Vec<String>,
}

pub async fn index_commits_git_local(
    deps: &IndexerDeps,
    repository_id: i64,
) -> Result<IndexOutcome> {
    let Some(repository) = Repository::find_by_id(repository_id, &deps.db_pool).await? else {
        tracing::warn!(repository_id, "repository no longer exists, skipping git local indexing");
        return Ok(IndexOutcome::Skipped {
            repository_id,
            reason: format!("repository {} no longer exists", repository_id),
        });
    };

    assert_safe_repository_full_name(&repository.full_name)?;

    // Same state gate as the API pipelines: the `running` CAS serializes
    // workers per pair, which also makes this worker the sole owner of the
    // repository's scratch clone directory.
    let mut state = IndexingState::get_or_create(
        repository_id,
        &repository.full_name,
        EntityKind::Commits,
        &deps.db_pool,
    )
    .await?;

    let now = deps.clock.now();
    if !state.should_run(now) {
        tracing::info!(
            repository = %repository.full_name,
            status = ?state.status,
            "git local indexing should not proceed (running, too recent, or max retries exceeded)"
        );
        return Ok(IndexOutcome::Skipped {
            repository_id,
            reason: "already running, too recent, or max retries exceeded".to_string(),
        });
    }

    if !state.begin(now, &deps.db_pool).await? {
        tracing::info!(
            repository = %repository.full_name,
            "another worker holds this pair"
        );
        return Ok(IndexOutcome::Skipped {
            repository_id,
            reason: "another worker is already indexing this pair".to_string(),
        });
    }

    let mut sync_log = SyncLog::start(&repository.full_name, "full", &deps.db_pool).await?;

    let token = deps
        .tokens
        .token_for_repository(
            &repository.full_name,
            repository.owner_id,
            TokenOperation::PrivateRepos,
        )
        .await?
        .map(|t| t.token);

    let git = GitService::new(deps.config.scratch_dir.clone());

    let run = run_sync(deps, &repository, &git, token.as_deref(), &mut sync_log).await;

    // The clone is scratch space; never leave it behind.
    git.cleanup(&repository.full_name).await;

    match run {
        Ok((report, oldest_commit_date)) => {
            // Backward cursor: the oldest point reached, never allowed to
            // move forward. An empty history keeps the previous cursor.
            let cursor = match (oldest_commit_date, state.last_indexed_at) {
                (Some(oldest), Some(previous)) => oldest.min(previous),
                (Some(oldest), None) => oldest,
                (None, Some(previous)) => previous,
                (None, None) => deps.clock.now(),
            };
            state
                .complete(cursor, report.processed, &deps.db_pool)
                .await?;
            Ok(IndexOutcome::Success(report))
        }
        Err(e) => {
            let message = e.to_string();
            sync_log.fail(&message, &deps.db_pool).await?;

            if let Some(reason) = e
                .downcast_ref::<super::git_service::GitServiceError>()
                .and_then(|git_err| git_err.terminal_reason())
            {
                // Terminal clone failures do not count against the retry
                // budget; mark the pair completed with the reason so it is
                // not hammered.
                tracing::warn!(
                    repository = %repository.full_name,
                    reason,
                    "terminal clone failure, skipping"
                );
                let cursor = state
                    .last_indexed_at
                    .unwrap_or_else(|| deps.clock.now());
                state
                    .complete_with_note(cursor, reason, &deps.db_pool)
                    .await?;
                return Ok(IndexOutcome::CloneSkipped {
                    repository_id,
                    reason: reason.to_string(),
                });
            }

            state.fail(&message, &deps.db_pool).await?;
            Ok(IndexOutcome::Failed {
                repository_id,
                error: message,
            })
        }
    }
}

async fn run_sync(
    deps: &IndexerDeps,
    repository: &Repository,
    git: &GitService,
    token: Option<&str>,
    sync_log: &mut SyncLog,
) -> Result<(IndexReport, Option<DateTime<Utc>>)> {
    git.clone_repository(&repository.clone_url, &repository.full_name, token)
        .await?;

    let commits = git.fetch_commits(&repository.full_name, None).await?;
    tracing::info!(
        repository = %repository.full_name,
        count = commits.len(),
        "fetched commits from local clone"
    );

    let counts = process_commits(deps, repository, git, &commits).await;

    // Log lists newest first.
    let last_commit_date = commits.first().and_then(|c| c.authored_date);
    let oldest_commit_date = commits.last().and_then(|c| c.authored_date);
    sync_log
        .complete(
            counts.processed,
            counts.new,
            counts.updated,
            counts.skipped,
            last_commit_date,
            oldest_commit_date,
            &deps.db_pool,
        )
        .await?;

    Repository::mark_indexed(repository.id, &deps.db_pool).await?;

    if let Err(e) = maybe_compute_kloc(deps, repository, git).await {
        tracing::warn!(repository = %repository.full_name, error = %e, "KLOC calculation skipped/failed");
    }

    tracing::info!(
        repository = %repository.full_name,
        new = counts.new,
        updated = counts.updated,
        skipped = counts.skipped,
        "git local sync complete"
    );

    let report = IndexReport {
        repository_id: repository.id,
        repository_full_name: repository.full_name.clone(),
        entity: EntityKind::Commits,
        processed: counts.processed,
        date_range: None,
        has_more: false,
        errors: counts.errors,
        note: None,
        follow_up: None,
    };

    Ok((report, oldest_commit_date))
}

/// Upsert every parsed commit. Per-commit failures are logged and counted
/// without aborting the run.
async fn process_commits(
    deps: &IndexerDeps,
    repository: &Repository,
    git: &GitService,
    commits: &[GitCommit],
) -> SyncCounts {
    let mut counts = SyncCounts::default();

    for commit in commits {
        if commit.sha.is_empty() {
            counts.skipped += 1;
            continue;
        }

        let result = upsert_one(deps, repository, git, commit).await;
        match result {
            Ok(existed) => {
                counts.processed += 1;
                if existed {
                    counts.updated += 1;
                } else {
                    counts.new += 1;
                }
            }
            Err(e) => {
                tracing::warn!(sha = %commit.sha, error = %e, "error processing commit");
                counts.errors.push(format!("commit {}: {}", commit.sha, e));
                counts.skipped += 1;
            }
        }
    }

    counts
}

async fn upsert_one(
    deps: &IndexerDeps,
    repository: &Repository,
    git: &GitService,
    commit: &GitCommit,
) -> Result<bool> {
    let existed = Commit::exists(&repository.full_name, &commit.sha, &deps.db_pool).await?;

    // Stats degrade to zero when git show output is unparseable.
    let stats = match git.commit_stats(&repository.full_name, &commit.sha).await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::warn!(sha = %commit.sha, error = %e, "could not fetch commit stats, using zeroes");
            Default::default()
        }
    };

    let file_changes: Vec<FileChange> = stats
        .files
        .iter()
        .map(|f| FileChange {
            filename: f.filename.clone(),
            additions: f.additions,
            deletions: f.deletions,
            changes: f.additions + f.deletions,
            status: if f.additions > 0 && f.deletions > 0 {
                "modified".to_string()
            } else if f.additions > 0 {
                "added".to_string()
            } else {
                "removed".to_string()
            },
        })
        .collect();

    let filenames: Vec<String> = file_changes.iter().map(|f| f.filename.clone()).collect();
    let commit_type = classify_commit(&commit.message, &filenames);

    let new = NewCommit {
        repository_full_name: repository.full_name.clone(),
        sha: commit.sha.clone(),
        message: commit.message.clone(),
        author_name: commit.author_name.clone(),
        author_email: commit.author_email.clone(),
        committer_name: commit.committer_name.clone(),
        committer_email: commit.committer_email.clone(),
        authored_date: commit.authored_date,
        committed_date: commit.committed_date,
        additions: stats.additions,
        deletions: stats.deletions,
        total_changes: stats.additions + stats.deletions,
        files_changed: file_changes,
        commit_type: commit_type.to_string(),
    };

    Commit::upsert(&new, &deps.db_pool).await?;
    Ok(existed)
}

async fn maybe_compute_kloc(
    deps: &IndexerDeps,
    repository: &Repository,
    git: &GitService,
) -> Result<()> {
    let now = deps.clock.now();
    if repository
        .has_recent_kloc(
            chrono::Duration::days(kloc::KLOC_MAX_AGE_DAYS),
            now,
            &deps.db_pool,
        )
        .await?
    {
        tracing::info!(repository = %repository.full_name, "KLOC is recent, skipping recalculation");
        return Ok(());
    }

    kloc::compute_for_clone(deps, repository, git).await?;
    Ok(())
}
