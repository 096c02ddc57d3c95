//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Recurring work runs here; everything else goes through the job queue:
//! - Daily per-entity fan-outs, staggered 10 minutes apart so the entity
//!   sweeps do not contend for the same credential budget
//! - Hourly reaper for stuck `running` indexing states
//! - Hourly health check
//! - Daily cleanup of old finished job rows
//!
//! ```text
//! Scheduler (daily, staggered)
//!     │
//!     └─► enqueue index_all_<entity>
//!             └─► fan-out task → one per-repo job per repository
//! ```

use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::common::EntityKind;
use crate::domains::indexing::tasks::enqueue_fan_out;
use crate::kernel::jobs::JobQueue;
use crate::kernel::IndexerDeps;
use crate::monitoring;

/// Start all scheduled tasks
pub async fn start_scheduler(
    deps: Arc<IndexerDeps>,
    queue: Arc<dyn JobQueue>,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Daily fan-outs at 02:00, 02:10, 02:20, ...
    for (slot, entity) in EntityKind::ALL.iter().enumerate() {
        let cron = format!("0 {} 2 * * *", slot * 10);
        let entity = *entity;
        let fan_out_queue = queue.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let queue = fan_out_queue.clone();
            Box::pin(async move {
                if let Err(e) = enqueue_fan_out(queue.as_ref(), entity).await {
                    tracing::error!(entity = entity.as_str(), error = %e, "fan-out enqueue failed");
                }
            })
        })?;
        scheduler.add(job).await?;
    }

    // Hourly stuck-state reaper
    let reaper_pool = deps.db_pool.clone();
    let reaper_job = Job::new_async("0 15 * * * *", move |_uuid, _lock| {
        let pool = reaper_pool.clone();
        Box::pin(async move {
            match monitoring::cleanup_stuck_indexing(&pool).await {
                Ok(cleaned) if cleaned > 0 => {
                    tracing::warn!(cleaned, "reset stuck indexing states");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "stuck-state cleanup failed"),
            }
        })
    })?;
    scheduler.add(reaper_job).await?;

    // Hourly health check
    let health_pool = deps.db_pool.clone();
    let health_job = Job::new_async("0 30 * * * *", move |_uuid, _lock| {
        let pool = health_pool.clone();
        Box::pin(async move {
            match monitoring::health_report(&pool).await {
                Ok(report) => {
                    for alert in &report.alerts {
                        tracing::warn!(kind = %alert.kind, "indexing alert: {}", alert.message);
                    }
                    tracing::info!(
                        successful_1h = report.overview.successful_jobs_1h,
                        failed_1h = report.overview.failed_jobs_1h,
                        "health check completed"
                    );
                }
                Err(e) => tracing::error!(error = %e, "health check failed"),
            }
        })
    })?;
    scheduler.add(health_job).await?;

    // Daily cleanup of finished job rows older than 30 days
    let cleanup_pool = deps.db_pool.clone();
    let cleanup_clock = deps.clock.clone();
    let cleanup_job = Job::new_async("0 45 3 * * *", move |_uuid, _lock| {
        let pool = cleanup_pool.clone();
        let clock = cleanup_clock.clone();
        Box::pin(async move {
            let cutoff = clock.now() - Duration::days(30);
            match crate::kernel::jobs::Job::delete_finished_before(cutoff, &pool).await {
                Ok(count) => tracing::info!(count, "cleaned up old finished jobs"),
                Err(e) => tracing::error!(error = %e, "job cleanup failed"),
            }
        })
    })?;
    scheduler.add(cleanup_job).await?;

    scheduler.start().await?;

    tracing::info!("scheduled tasks started (daily fan-outs, hourly reaper and health check)");
    Ok(scheduler)
}
