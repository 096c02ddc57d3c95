//! Release pipeline.
//!
//! Forward incremental like pull requests. Filtering is on `published_at`;
//! drafts have no `published_at` and are admitted on `created_at` instead.

use anyhow::Result;

use crate::common::{DateRange, EntityKind};
use crate::domains::indexing::models::release::NewRelease;
use crate::domains::indexing::models::{Release, Repository};
use crate::domains::tokens::TokenOperation;
use crate::kernel::IndexerDeps;

use super::outcome::{IndexOutcome, IndexReport};
use super::support::{fail_with, open_gate, Gate};

const ENTITY: EntityKind = EntityKind::Releases;

/// Whether a wire release falls inside the window: published releases by
/// `published_at`, drafts by `created_at`.
fn in_window(release: &github::Release, window: &DateRange) -> bool {
    match release.published_at {
        Some(published_at) => window.contains(published_at),
        None => {
            release.draft
                && release
                    .created_at
                    .map(|created_at| window.contains(created_at))
                    .unwrap_or(false)
        }
    }
}

/// Whether a page entry proves the listing has moved past the window.
fn past_window(release: &github::Release, window: &DateRange) -> bool {
    release
        .published_at
        .map(|published_at| published_at < window.since)
        .unwrap_or(false)
}

pub async fn index_releases(deps: &IndexerDeps, repository_id: i64) -> Result<IndexOutcome> {
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
        .expect("releases use forward windows");

    tracing::info!(
        repository = %repository.full_name,
        since = %window.since,
        until = %window.until,
        "indexing releases window"
    );

    let mut errors = Vec::new();
    let mut processed = 0i64;
    let mut page = 1u32;

    'pages: loop {
        let batch = match client
            .list_releases(repository.owner(), repository.repo(), page)
            .await
        {
            Ok(batch) => batch,
            Err(e) => return fail_with(deps, &mut state, repository_id, &e).await,
        };

        if batch.is_empty() {
            break;
        }
        let batch_len = batch.len();

        for release in batch {
            if past_window(&release, &window) {
                tracing::info!(
                    repository = %repository.full_name,
                    "reached releases older than {}, stopping",
                    window.since
                );
                break 'pages;
            }
            if !in_window(&release, &window) {
                continue;
            }

            match upsert_one(deps, &repository, &release).await {
                Ok(()) => processed += 1,
                Err(e) => {
                    tracing::warn!(release_id = release.id, error = %e, "failed to process release");
                    errors.push(format!("release {}: {}", release.id, e));
                }
            }
        }

        if batch_len < github::PER_PAGE as usize {
            break;
        }
        page += 1;
        if page > ENTITY.page_cap() {
            tracing::warn!(repository = %repository.full_name, "hit release page cap");
            break;
        }
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

async fn upsert_one(
    deps: &IndexerDeps,
    repository: &Repository,
    release: &github::Release,
) -> Result<()> {
    let new = NewRelease {
        release_id: release.id,
        repository_full_name: repository.full_name.clone(),
        tag_name: release.tag_name.clone().unwrap_or_default(),
        name: release.name.clone().unwrap_or_default(),
        author: release
            .author
            .as_ref()
            .map(|a| a.login.clone())
            .unwrap_or_default(),
        draft: release.draft,
        prerelease: release.prerelease,
        created_at: release.created_at,
        published_at: release.published_at,
        url: release.html_url.clone().unwrap_or_default(),
        assets: serde_json::to_value(&release.assets)?,
    };

    Release::upsert(&new, &deps.db_pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn release(
        published_at: Option<DateTime<Utc>>,
        created_at: Option<DateTime<Utc>>,
        draft: bool,
    ) -> github::Release {
        github::Release {
            id: 1,
            tag_name: None,
            name: None,
            author: None,
            draft,
            prerelease: false,
            created_at,
            published_at,
            html_url: None,
            assets: Vec::new(),
        }
    }

    fn window() -> DateRange {
        let since = at("2024-05-01T00:00:00Z");
        DateRange {
            since,
            until: since + Duration::days(30),
        }
    }

    #[test]
    fn published_releases_filter_on_published_at() {
        let w = window();
        assert!(in_window(&release(Some(w.since + Duration::days(1)), None, false), &w));
        assert!(!in_window(&release(Some(w.since - Duration::days(1)), None, false), &w));
    }

    #[test]
    fn drafts_without_published_at_filter_on_created_at() {
        let w = window();
        assert!(in_window(
            &release(None, Some(w.since + Duration::days(2)), true),
            &w
        ));
        assert!(!in_window(
            &release(None, Some(w.since - Duration::days(2)), true),
            &w
        ));
        // Non-draft with no published_at is excluded entirely.
        assert!(!in_window(
            &release(None, Some(w.since + Duration::days(2)), false),
            &w
        ));
    }

    #[test]
    fn only_published_entries_prove_the_window_is_past() {
        let w = window();
        assert!(past_window(&release(Some(w.since - Duration::days(1)), None, false), &w));
        assert!(!past_window(
            &release(None, Some(w.since - Duration::days(1)), true),
            &w
        ));
    }
}
