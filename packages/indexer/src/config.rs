use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

/// Which commit pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingService {
    /// GitHub REST API with windowed backfill.
    Api,
    /// Shallow local clone + git log parsing.
    GitLocal,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub indexing_service: IndexingService,
    pub worker_count: usize,
    /// Parent directory for per-repository clone scratch dirs.
    pub scratch_dir: PathBuf,
    /// OAuth-app client secret, usable as a public-repo fallback credential.
    pub github_oauth_app_secret: Option<String>,
    /// When true, a user token missing a required scope is rejected instead
    /// of used.
    pub enforce_token_scopes: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let indexing_service = match env::var("INDEXING_SERVICE").as_deref() {
            Ok("git_local") => IndexingService::GitLocal,
            _ => IndexingService::Api,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            indexing_service,
            worker_count: env::var("WORKER_COUNT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("WORKER_COUNT must be a valid number")?,
            scratch_dir: env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
            github_oauth_app_secret: env::var("GITHUB_OAUTH_APP_SECRET").ok(),
            enforce_token_scopes: env::var("ENFORCE_TOKEN_SCOPES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}
