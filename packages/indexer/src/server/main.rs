//! Indexer entrypoint: migrations, cron schedules, job runners, health
//! server.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use indexer_core::config::Config;
use indexer_core::domains::indexing::tasks::build_job_registry;
use indexer_core::kernel::jobs::{JobRunner, JobRunnerConfig, JobQueue, PostgresJobQueue};
use indexer_core::kernel::{scheduled_tasks, IndexerDeps};
use indexer_core::server::build_app;

#[derive(Debug, Parser)]
#[command(name = "indexer", about = "GitPulse incremental indexing engine")]
struct Cli {
    /// Override the number of job runner workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Run database migrations and exit.
    #[arg(long)]
    migrate_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("migrations failed")?;

    if cli.migrate_only {
        tracing::info!("migrations applied, exiting");
        return Ok(());
    }

    let worker_count = cli.workers.unwrap_or(config.worker_count).max(1);
    let port = config.port;

    let deps = Arc::new(IndexerDeps::new(pool.clone(), config));
    let queue: Arc<dyn JobQueue> = Arc::new(PostgresJobQueue::new(pool.clone()));
    let registry = Arc::new(build_job_registry(queue.clone()));

    let _scheduler = scheduled_tasks::start_scheduler(deps.clone(), queue.clone()).await?;

    let mut runner_handles = Vec::with_capacity(worker_count);
    for slot in 0..worker_count {
        let runner = JobRunner::with_config(
            queue.clone(),
            registry.clone(),
            deps.clone(),
            JobRunnerConfig::with_worker_id(format!("indexer-worker-{slot}")),
        );
        runner_handles.push(tokio::spawn(runner.run_until_shutdown()));
    }

    tracing::info!(workers = worker_count, port, "indexer started");

    let app = build_app(deps.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .context("failed to bind health server port")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    for handle in runner_handles {
        let _ = handle.await;
    }

    tracing::info!("indexer stopped");
    Ok(())
}
