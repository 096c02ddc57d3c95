//! CodeQL alert pipeline.
//!
//! Snapshot semantics: every run re-reads the full alert set across the
//! open, dismissed and fixed states, upserts each alert, then prunes
//! persisted open alerts that upstream no longer reports open. HTTP
//! outcomes have distinct meanings here: a 404 is "feature not enabled",
//! not an error.

use anyhow::Result;

use crate::common::EntityKind;
use crate::domains::indexing::models::codeql::{
    categorize_rule, extract_cwe_id, normalize_severity, NewCodeQlVulnerability,
};
use crate::domains::indexing::models::CodeQlVulnerability;
use crate::domains::tokens::TokenOperation;
use crate::kernel::IndexerDeps;

use super::outcome::{IndexOutcome, IndexReport};
use super::support::{fail_with, open_gate, Gate};

const ENTITY: EntityKind = EntityKind::CodeqlVulnerabilities;

const ALERT_STATES: [&str; 3] = ["open", "dismissed", "fixed"];

pub async fn index_codeql(deps: &IndexerDeps, repository_id: i64) -> Result<IndexOutcome> {
    let (repository, mut state, client) =
        match open_gate(deps, repository_id, ENTITY, TokenOperation::CodeScanning).await? {
            Gate::Ready {
                repository,
                state,
                client,
            } => (repository, state, client),
            Gate::Done(outcome) => return Ok(*outcome),
        };

    tracing::info!(repository = %repository.full_name, "indexing CodeQL alerts");

    let mut alerts = Vec::new();
    for alert_state in ALERT_STATES {
        let mut page = 1u32;
        loop {
            let batch = match client
                .list_code_scanning_alerts(
                    repository.owner(),
                    repository.repo(),
                    alert_state,
                    page,
                )
                .await
            {
                Ok(batch) => batch,
                Err(github::GitHubError::NotFoundOrDisabled { .. }) => {
                    // Code scanning is not enabled for this repository.
                    // Mark completed so the pair is not retried soon.
                    let now = deps.clock.now();
                    state
                        .complete_with_note(now, "CodeQL not available", &deps.db_pool)
                        .await?;
                    tracing::info!(
                        repository = %repository.full_name,
                        "CodeQL not available, marked completed"
                    );
                    return Ok(IndexOutcome::Success(IndexReport {
                        repository_id,
                        repository_full_name: repository.full_name.clone(),
                        entity: ENTITY,
                        processed: 0,
                        date_range: None,
                        has_more: false,
                        errors: Vec::new(),
                        note: Some("CodeQL not available".to_string()),
                        follow_up: None,
                    }));
                }
                // Rate limiting defers without burning a retry; permission
                // denials exhaust the budget; other failures count one.
                Err(e) => return fail_with(deps, &mut state, repository_id, &e).await,
            };

            let batch_len = batch.len();
            alerts.extend(batch);

            if batch_len < github::PER_PAGE as usize {
                break;
            }
            page += 1;
            if page > ENTITY.page_cap() {
                tracing::warn!(
                    repository = %repository.full_name,
                    alert_state,
                    "hit CodeQL page cap"
                );
                break;
            }
        }
    }

    tracing::info!(
        repository = %repository.full_name,
        count = alerts.len(),
        "fetched CodeQL alerts"
    );

    let mut errors = Vec::new();
    let mut processed = 0i64;
    let mut open_ids = Vec::new();

    for alert in &alerts {
        let new = convert_alert(alert, &repository.full_name);
        if new.state == "open" {
            open_ids.push(new.vulnerability_id.clone());
        }
        match CodeQlVulnerability::upsert(&new, &deps.db_pool).await {
            Ok(_) => processed += 1,
            Err(e) => {
                tracing::warn!(alert = alert.number, error = %e, "failed to process alert");
                errors.push(format!("alert {}: {}", alert.number, e));
            }
        }
    }

    // Obsolescence prune: open alerts upstream no longer reports open are
    // gone (fixed via force-push, repo config change, ...). Dismissed and
    // fixed history is retained.
    let removed =
        CodeQlVulnerability::prune_stale_open(&repository.full_name, &open_ids, &deps.db_pool)
            .await?;
    if removed > 0 {
        tracing::info!(
            repository = %repository.full_name,
            removed,
            "pruned obsolete open vulnerabilities"
        );
    }

    let now = deps.clock.now();
    state.complete(now, processed, &deps.db_pool).await?;

    Ok(IndexOutcome::Success(IndexReport {
        repository_id,
        repository_full_name: repository.full_name.clone(),
        entity: ENTITY,
        processed,
        date_range: None,
        has_more: false,
        errors,
        note: None,
        follow_up: None,
    }))
}

/// Normalize one wire alert into a persistable record.
fn convert_alert(alert: &github::CodeScanningAlert, repository_full_name: &str) -> NewCodeQlVulnerability {
    let rule = alert.rule.clone().unwrap_or(github::AlertRule {
        id: None,
        name: None,
        description: None,
        full_description: None,
        severity: None,
        precision: None,
        tags: Vec::new(),
    });
    let instance = alert.most_recent_instance.clone();
    let location = instance.as_ref().and_then(|i| i.location.clone());

    let rule_id = rule.id.clone().unwrap_or_else(|| "unknown".to_string());
    let severity = normalize_severity(rule.severity.as_deref().unwrap_or("medium"));

    NewCodeQlVulnerability {
        repository_full_name: repository_full_name.to_string(),
        vulnerability_id: alert.number.to_string(),
        rule_id: rule_id.clone(),
        rule_name: rule.name.clone().unwrap_or_default(),
        rule_description: rule.description.clone().unwrap_or_default(),
        description: rule.full_description.clone().unwrap_or_default(),
        severity: severity.to_string(),
        confidence: rule
            .precision
            .clone()
            .unwrap_or_else(|| "medium".to_string())
            .to_lowercase(),
        state: alert
            .state
            .clone()
            .unwrap_or_else(|| "open".to_string())
            .to_lowercase(),
        dismissed_reason: alert.dismissed_reason.clone(),
        dismissed_comment: alert.dismissed_comment.clone(),
        file_path: location.as_ref().and_then(|l| l.path.clone()),
        start_line: location.as_ref().and_then(|l| l.start_line),
        end_line: location.as_ref().and_then(|l| l.end_line),
        start_column: location.as_ref().and_then(|l| l.start_column),
        end_column: location.as_ref().and_then(|l| l.end_column),
        message: instance
            .as_ref()
            .and_then(|i| i.message.as_ref())
            .and_then(|m| m.text.clone())
            .unwrap_or_default(),
        category: categorize_rule(&rule_id, &rule.tags).to_string(),
        cwe_id: extract_cwe_id(&rule.tags),
        created_at: alert.created_at,
        updated_at: alert.updated_at,
        dismissed_at: alert.dismissed_at,
        fixed_at: alert.fixed_at,
        url: alert.html_url.clone().unwrap_or_default(),
        number: Some(alert.number),
        tool_version: instance.as_ref().and_then(|i| i.analysis_key.clone()),
        payload: serde_json::to_value(alert).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(state: &str, severity: &str, tags: Vec<String>) -> github::CodeScanningAlert {
        github::CodeScanningAlert {
            number: 42,
            state: Some(state.to_string()),
            created_at: None,
            updated_at: None,
            dismissed_at: None,
            fixed_at: None,
            dismissed_reason: None,
            dismissed_comment: None,
            html_url: None,
            rule: Some(github::AlertRule {
                id: Some("js/sql-injection".to_string()),
                name: Some("SQL injection".to_string()),
                description: None,
                full_description: None,
                severity: Some(severity.to_string()),
                precision: Some("High".to_string()),
                tags,
            }),
            most_recent_instance: None,
        }
    }

    #[test]
    fn conversion_normalizes_severity_state_and_category() {
        let converted = convert_alert(
            &alert("Open", "error", vec!["CWE-089".to_string()]),
            "octo/widgets",
        );
        assert_eq!(converted.vulnerability_id, "42");
        assert_eq!(converted.severity, "critical");
        assert_eq!(converted.state, "open");
        assert_eq!(converted.category, "sql-injection");
        assert_eq!(converted.cwe_id, Some("CWE-089".to_string()));
        assert_eq!(converted.confidence, "high");
    }

    #[test]
    fn missing_rule_defaults_are_safe() {
        let mut wire = alert("open", "warning", Vec::new());
        wire.rule = None;
        let converted = convert_alert(&wire, "octo/widgets");
        assert_eq!(converted.rule_id, "unknown");
        assert_eq!(converted.severity, "medium");
        assert_eq!(converted.category, "other");
        assert_eq!(converted.cwe_id, None);
    }
}
