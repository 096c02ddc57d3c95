//! Indexer dependencies handed to job handlers.
//!
//! All external services sit behind this container so pipelines stay
//! unit-testable: the database pool, the token broker, the wall clock and
//! the loaded configuration. Handlers receive an `Arc<IndexerDeps>` from the
//! runner and thread it down into the pipelines.

use std::sync::Arc;

use sqlx::PgPool;

use crate::common::{Clock, SystemClock};
use crate::config::Config;
use crate::domains::tokens::TokenBroker;

#[derive(Clone)]
pub struct IndexerDeps {
    pub db_pool: PgPool,
    pub tokens: Arc<TokenBroker>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
    /// API root override for the GitHub client (tests point this at a local
    /// server; production leaves it `None`).
    pub github_base_url: Option<String>,
}

impl IndexerDeps {
    pub fn new(db_pool: PgPool, config: Config) -> Self {
        let config = Arc::new(config);
        let tokens = Arc::new(TokenBroker::new(
            db_pool.clone(),
            config.github_oauth_app_secret.clone(),
            config.enforce_token_scopes,
        ));
        Self {
            db_pool,
            tokens,
            clock: Arc::new(SystemClock),
            config,
            github_base_url: None,
        }
    }

    /// Build a GitHub client bound to this deployment's API root.
    pub fn github_client(&self, token: Option<String>) -> github::GitHubClient {
        match &self.github_base_url {
            Some(base) => github::GitHubClient::with_base_url(token, base.clone()),
            None => github::GitHubClient::new(token),
        }
    }
}
