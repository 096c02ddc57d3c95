//! Indexing health and performance monitoring.
//!
//! Read-only reporting over the state and job tables, plus the stuck-state
//! sweeper that returns abandoned `running` rows to `pending`.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::domains::indexing::models::IndexingState;

/// `running` rows untouched for longer than this are considered abandoned.
const STUCK_THRESHOLD_HOURS: i64 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub overview: Overview,
    pub status_breakdown: BTreeMap<String, i64>,
    pub error_analysis: BTreeMap<String, i64>,
    pub performance: Performance,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub total_repositories: i64,
    pub total_indexing_states: i64,
    pub recent_jobs_1h: i64,
    pub successful_jobs_1h: i64,
    pub failed_jobs_1h: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub avg_execution_time_seconds: f64,
    pub success_rate_1h: f64,
    pub rate_limit_errors_1h: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: &'static str,
    pub kind: &'static str,
    pub message: String,
}

/// Categorize an error message into a coarse failure family.
pub fn categorize_error(message: &str) -> &'static str {
    let lowered = message.to_lowercase();
    if lowered.contains("rate limit") || lowered.contains("429") {
        "rate_limit"
    } else if lowered.contains("not found") || lowered.contains("404") {
        "not_found"
    } else if lowered.contains("unauthorized") || lowered.contains("401") {
        "unauthorized"
    } else if lowered.contains("forbidden") || lowered.contains("403") {
        "forbidden"
    } else if lowered.contains("timeout") || lowered.contains("connection") {
        "network"
    } else if lowered.contains("conflict") || lowered.contains("409") {
        "conflict"
    } else {
        "other"
    }
}

/// Threshold alerts over the raw metrics.
pub fn generate_alerts(
    status_breakdown: &BTreeMap<String, i64>,
    rate_limit_errors: i64,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let total: i64 = status_breakdown.values().sum();
    let errors = status_breakdown.get("error").copied().unwrap_or(0);
    if total > 0 && errors * 10 > total {
        alerts.push(Alert {
            level: "warning",
            kind: "high_error_rate",
            message: format!("High error rate: {}/{} states in error", errors, total),
        });
    }

    if rate_limit_errors > 5 {
        alerts.push(Alert {
            level: "warning",
            kind: "rate_limit_issues",
            message: format!(
                "High rate limit errors: {} in the last hour",
                rate_limit_errors
            ),
        });
    }

    let running = status_breakdown.get("running").copied().unwrap_or(0);
    if running > 3 {
        alerts.push(Alert {
            level: "warning",
            kind: "stuck_indexing",
            message: format!("Multiple stuck indexing operations: {}", running),
        });
    }

    alerts
}

/// Build the full health report.
pub async fn health_report(pool: &PgPool) -> Result<HealthReport> {
    let now = Utc::now();

    let total_repositories =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM repositories")
            .fetch_one(pool)
            .await?;

    let status_rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT status::TEXT, COUNT(*) FROM indexing_states GROUP BY status",
    )
    .fetch_all(pool)
    .await?;
    let status_breakdown: BTreeMap<String, i64> = status_rows.into_iter().collect();
    let total_indexing_states: i64 = status_breakdown.values().sum();

    let error_messages = sqlx::query_scalar::<_, Option<String>>(
        "SELECT error_message FROM indexing_states WHERE status = 'error'",
    )
    .fetch_all(pool)
    .await?;
    let mut error_analysis: BTreeMap<String, i64> = BTreeMap::new();
    for message in error_messages {
        let category = categorize_error(message.as_deref().unwrap_or("Unknown error"));
        *error_analysis.entry(category.to_string()).or_insert(0) += 1;
    }

    // Job metrics over the last hour.
    let (recent, succeeded, failed) = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"
        SELECT COUNT(*),
               COUNT(*) FILTER (WHERE status = 'succeeded'),
               COUNT(*) FILTER (WHERE status IN ('failed', 'dead_letter'))
        FROM jobs
        WHERE last_run_at >= NOW() - INTERVAL '1 hour'
        "#,
    )
    .fetch_one(pool)
    .await?;

    let avg_execution_time = sqlx::query_scalar::<_, Option<f64>>(
        r#"
        SELECT AVG(EXTRACT(EPOCH FROM (updated_at - last_run_at)))::FLOAT8
        FROM jobs
        WHERE status = 'succeeded'
          AND last_run_at >= NOW() - INTERVAL '1 hour'
        "#,
    )
    .fetch_one(pool)
    .await?
    .unwrap_or(0.0);

    let rate_limit_errors = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM jobs
        WHERE status IN ('failed', 'dead_letter')
          AND last_run_at >= NOW() - INTERVAL '1 hour'
          AND LOWER(COALESCE(error_message, '')) LIKE '%rate limit%'
        "#,
    )
    .fetch_one(pool)
    .await?;

    let success_rate = if recent > 0 {
        (succeeded as f64 / recent as f64) * 100.0
    } else {
        100.0
    };

    let alerts = generate_alerts(&status_breakdown, rate_limit_errors);

    Ok(HealthReport {
        timestamp: now,
        overview: Overview {
            total_repositories,
            total_indexing_states,
            recent_jobs_1h: recent,
            successful_jobs_1h: succeeded,
            failed_jobs_1h: failed,
        },
        status_breakdown,
        error_analysis,
        performance: Performance {
            avg_execution_time_seconds: (avg_execution_time * 100.0).round() / 100.0,
            success_rate_1h: (success_rate * 100.0).round() / 100.0,
            rate_limit_errors_1h: rate_limit_errors,
        },
        alerts,
    })
}

/// Reap indexing states stuck in `running`: back to `pending` with the
/// retry count bumped (capped at max_retries). Returns how many rows were
/// reset.
pub async fn cleanup_stuck_indexing(pool: &PgPool) -> Result<i64> {
    let reset = sqlx::query(
        r#"
        UPDATE indexing_states
        SET status = 'pending',
            retry_count = LEAST(retry_count + 1, max_retries),
            updated_at = NOW()
        WHERE status = 'running'
          AND updated_at < NOW() - make_interval(hours => $1)
        "#,
    )
    .bind(STUCK_THRESHOLD_HOURS as i32)
    .execute(pool)
    .await?
    .rows_affected();

    if reset > 0 {
        tracing::warn!(count = reset, "reset stuck indexing states to pending");
    }
    Ok(reset as i64)
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryStatus {
    pub repository_id: i64,
    pub states: Vec<IndexingState>,
}

/// Per-entity indexing state for one repository.
pub async fn repository_status(pool: &PgPool, repository_id: i64) -> Result<RepositoryStatus> {
    let states = IndexingState::find_for_repository(repository_id, pool).await?;
    Ok(RepositoryStatus {
        repository_id,
        states,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_categorization_table() {
        assert_eq!(categorize_error("API rate limit exceeded"), "rate_limit");
        assert_eq!(categorize_error("HTTP 429 too many requests"), "rate_limit");
        assert_eq!(categorize_error("repository not found"), "not_found");
        assert_eq!(categorize_error("401 Unauthorized"), "unauthorized");
        assert_eq!(categorize_error("403 Forbidden"), "forbidden");
        assert_eq!(categorize_error("connection reset by peer"), "network");
        assert_eq!(categorize_error("request timeout"), "network");
        assert_eq!(categorize_error("409 Conflict"), "conflict");
        assert_eq!(categorize_error("something else entirely"), "other");
    }

    #[test]
    fn alert_thresholds() {
        let mut breakdown = BTreeMap::new();
        breakdown.insert("completed".to_string(), 80i64);
        breakdown.insert("error".to_string(), 5i64);
        // 5/85 < 10%: no error alert, no others.
        assert!(generate_alerts(&breakdown, 0).is_empty());

        breakdown.insert("error".to_string(), 20i64);
        let alerts = generate_alerts(&breakdown, 0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "high_error_rate");

        let alerts = generate_alerts(&breakdown, 6);
        assert!(alerts.iter().any(|a| a.kind == "rate_limit_issues"));

        breakdown.insert("running".to_string(), 4i64);
        let alerts = generate_alerts(&breakdown, 0);
        assert!(alerts.iter().any(|a| a.kind == "stuck_indexing"));
    }
}
