//! CodeQL vulnerability records, keyed by (repository_full_name,
//! vulnerability_id), with the normalization rules applied when converting
//! upstream alerts.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::sanitize::assert_safe_repository_full_name;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CodeQlVulnerability {
    pub id: Uuid,
    pub repository_full_name: String,
    pub vulnerability_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub rule_description: String,
    pub description: String,
    pub severity: String,
    pub confidence: String,
    pub state: String,
    pub dismissed_reason: Option<String>,
    pub dismissed_comment: Option<String>,
    pub file_path: Option<String>,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub start_column: Option<i64>,
    pub end_column: Option<i64>,
    pub message: String,
    pub category: String,
    pub cwe_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub fixed_at: Option<DateTime<Utc>>,
    pub url: String,
    pub number: Option<i64>,
    pub tool_name: String,
    pub tool_version: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCodeQlVulnerability {
    pub repository_full_name: String,
    pub vulnerability_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub rule_description: String,
    pub description: String,
    pub severity: String,
    pub confidence: String,
    pub state: String,
    pub dismissed_reason: Option<String>,
    pub dismissed_comment: Option<String>,
    pub file_path: Option<String>,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub start_column: Option<i64>,
    pub end_column: Option<i64>,
    pub message: String,
    pub category: String,
    pub cwe_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub fixed_at: Option<DateTime<Utc>>,
    pub url: String,
    pub number: Option<i64>,
    pub tool_version: Option<String>,
    pub payload: Option<serde_json::Value>,
}

/// Map upstream severity values onto the closed severity set. Unknown
/// values fall back to medium.
pub fn normalize_severity(raw: &str) -> &'static str {
    match raw.to_lowercase().as_str() {
        "error" | "critical" => "critical",
        "warning" | "high" => "high",
        "note" | "medium" => "medium",
        "low" => "low",
        _ => "medium",
    }
}

/// Extract the first `CWE-*` tag from a rule's tag list.
pub fn extract_cwe_id(tags: &[String]) -> Option<String> {
    tags.iter()
        .find(|tag| tag.starts_with("CWE-"))
        .cloned()
}

/// Categorize a rule by id and tags.
pub fn categorize_rule(rule_id: &str, tags: &[String]) -> &'static str {
    let rule_id = rule_id.to_lowercase();
    let has_tag = |needle: &str| tags.iter().any(|t| t == needle);

    if rule_id.contains("sql-injection") || has_tag("sql") {
        "sql-injection"
    } else if rule_id.contains("xss") || has_tag("cross-site-scripting") {
        "xss"
    } else if rule_id.contains("path-traversal") || has_tag("path") {
        "path-traversal"
    } else if rule_id.contains("command-injection") || has_tag("command") {
        "command-injection"
    } else if rule_id.contains("authentication") || has_tag("auth") {
        "authentication"
    } else if rule_id.contains("authorization") || has_tag("authz") {
        "authorization"
    } else if rule_id.contains("crypto") || has_tag("cryptography") {
        "cryptography"
    } else if rule_id.contains("information-exposure") {
        "information-disclosure"
    } else {
        "other"
    }
}

impl CodeQlVulnerability {
    pub async fn upsert(new: &NewCodeQlVulnerability, pool: &PgPool) -> Result<Self> {
        assert_safe_repository_full_name(&new.repository_full_name)?;
        let vulnerability = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO codeql_vulnerabilities (
                id, repository_full_name, vulnerability_id, rule_id, rule_name,
                rule_description, description, severity, confidence, state,
                dismissed_reason, dismissed_comment, file_path,
                start_line, end_line, start_column, end_column,
                message, category, cwe_id, created_at, updated_at,
                dismissed_at, fixed_at, url, number, tool_version, payload, synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
                    $21, $22, $23, $24, $25, $26, $27, $28, NOW())
            ON CONFLICT (repository_full_name, vulnerability_id) DO UPDATE SET
                state = EXCLUDED.state,
                severity = EXCLUDED.severity,
                dismissed_reason = EXCLUDED.dismissed_reason,
                dismissed_comment = EXCLUDED.dismissed_comment,
                dismissed_at = EXCLUDED.dismissed_at,
                fixed_at = EXCLUDED.fixed_at,
                updated_at = EXCLUDED.updated_at,
                message = EXCLUDED.message,
                file_path = EXCLUDED.file_path,
                start_line = EXCLUDED.start_line,
                end_line = EXCLUDED.end_line,
                start_column = EXCLUDED.start_column,
                end_column = EXCLUDED.end_column,
                payload = EXCLUDED.payload,
                synced_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.repository_full_name)
        .bind(&new.vulnerability_id)
        .bind(&new.rule_id)
        .bind(&new.rule_name)
        .bind(&new.rule_description)
        .bind(&new.description)
        .bind(&new.severity)
        .bind(&new.confidence)
        .bind(&new.state)
        .bind(&new.dismissed_reason)
        .bind(&new.dismissed_comment)
        .bind(&new.file_path)
        .bind(new.start_line)
        .bind(new.end_line)
        .bind(new.start_column)
        .bind(new.end_column)
        .bind(&new.message)
        .bind(&new.category)
        .bind(&new.cwe_id)
        .bind(new.created_at)
        .bind(new.updated_at)
        .bind(new.dismissed_at)
        .bind(new.fixed_at)
        .bind(&new.url)
        .bind(new.number)
        .bind(&new.tool_version)
        .bind(&new.payload)
        .fetch_one(pool)
        .await?;

        Ok(vulnerability)
    }

    /// Delete persisted open alerts whose id is no longer in the upstream
    /// open set. Fixed and dismissed records are retained.
    pub async fn prune_stale_open(
        repository_full_name: &str,
        open_ids: &[String],
        pool: &PgPool,
    ) -> Result<u64> {
        assert_safe_repository_full_name(repository_full_name)?;
        let deleted = sqlx::query(
            r#"
            DELETE FROM codeql_vulnerabilities
            WHERE repository_full_name = $1
              AND state = 'open'
              AND vulnerability_id <> ALL($2)
            "#,
        )
        .bind(repository_full_name)
        .bind(open_ids)
        .execute(pool)
        .await?
        .rows_affected();

        Ok(deleted)
    }

    pub async fn find_open_ids(repository_full_name: &str, pool: &PgPool) -> Result<Vec<String>> {
        assert_safe_repository_full_name(repository_full_name)?;
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT vulnerability_id FROM codeql_vulnerabilities
            WHERE repository_full_name = $1 AND state = 'open'
            ORDER BY vulnerability_id
            "#,
        )
        .bind(repository_full_name)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_normalization_table() {
        assert_eq!(normalize_severity("error"), "critical");
        assert_eq!(normalize_severity("warning"), "high");
        assert_eq!(normalize_severity("note"), "medium");
        assert_eq!(normalize_severity("critical"), "critical");
        assert_eq!(normalize_severity("High"), "high");
        assert_eq!(normalize_severity("low"), "low");
        assert_eq!(normalize_severity("bogus"), "medium");
        assert_eq!(normalize_severity(""), "medium");
    }

    #[test]
    fn cwe_extraction_takes_first_cwe_tag() {
        let tags = vec![
            "security".to_string(),
            "CWE-089".to_string(),
            "CWE-564".to_string(),
        ];
        assert_eq!(extract_cwe_id(&tags), Some("CWE-089".to_string()));
        assert_eq!(extract_cwe_id(&["security".to_string()]), None);
    }

    #[test]
    fn categorization_by_rule_id_and_tags() {
        assert_eq!(categorize_rule("js/sql-injection", &[]), "sql-injection");
        assert_eq!(
            categorize_rule("py/anything", &["sql".to_string()]),
            "sql-injection"
        );
        assert_eq!(categorize_rule("js/xss-through-dom", &[]), "xss");
        assert_eq!(categorize_rule("java/path-traversal", &[]), "path-traversal");
        assert_eq!(
            categorize_rule("py/command-injection", &[]),
            "command-injection"
        );
        assert_eq!(
            categorize_rule("cs/weak-crypto-algorithm", &[]),
            "cryptography"
        );
        assert_eq!(
            categorize_rule("js/information-exposure-through-errors", &[]),
            "information-disclosure"
        );
        assert_eq!(categorize_rule("js/unused-variable", &[]), "other");
    }
}
