//! Credential resolution for GitHub calls.
//!
//! Priority order for a repository:
//! 1. Installation token minted from the owning organization's GitHub App
//!    integration (cached until shortly before expiry)
//! 2. The repository owner's stored OAuth token, if not expired
//! 3. The OAuth-app client secret (public repositories only)

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;

use super::scopes::{has_required_scopes, scopes_for_operation, TokenOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Installation,
    UserOauth,
    OauthApp,
}

#[derive(Debug, Clone)]
pub struct ResolvedToken {
    pub token: String,
    pub source: TokenSource,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct IntegrationConfig {
    app_id: Option<String>,
    private_key: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct UserProfileToken {
    github_token: Option<String>,
    github_token_expires_at: Option<DateTime<Utc>>,
    github_scopes: Vec<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct TokenBroker {
    pool: PgPool,
    oauth_app_secret: Option<String>,
    enforce_scopes: bool,
    /// Installation tokens per organization, kept until 60 s before expiry.
    cache: Mutex<HashMap<String, CachedToken>>,
    /// API root override for app-auth calls (tests).
    github_base_url: Option<String>,
}

impl TokenBroker {
    pub fn new(pool: PgPool, oauth_app_secret: Option<String>, enforce_scopes: bool) -> Self {
        Self {
            pool,
            oauth_app_secret,
            enforce_scopes,
            cache: Mutex::new(HashMap::new()),
            github_base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.github_base_url = Some(base_url);
        self
    }

    /// Resolve a credential for a repository in priority order. Returns
    /// `None` when no credential source yields a token; callers then skip
    /// the run rather than erroring.
    pub async fn token_for_repository(
        &self,
        repository_full_name: &str,
        owner_user_id: Option<i64>,
        operation: TokenOperation,
    ) -> Result<Option<ResolvedToken>> {
        let organization = repository_full_name.split('/').next().unwrap_or("");

        match self.installation_token_for_org(organization).await {
            Ok(Some(token)) => {
                tracing::info!(org = organization, "using installation token");
                return Ok(Some(ResolvedToken {
                    token,
                    source: TokenSource::Installation,
                }));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(org = organization, error = %e, "installation token resolution failed");
            }
        }

        if let Some(user_id) = owner_user_id {
            if let Some(token) = self.user_token(user_id, operation).await? {
                tracing::debug!(user_id, "using user OAuth token");
                return Ok(Some(ResolvedToken {
                    token,
                    source: TokenSource::UserOauth,
                }));
            }
        }

        if let Some(secret) = &self.oauth_app_secret {
            tracing::debug!("falling back to OAuth-app secret");
            return Ok(Some(ResolvedToken {
                token: secret.clone(),
                source: TokenSource::OauthApp,
            }));
        }

        tracing::warn!(
            repository = repository_full_name,
            "no credential available"
        );
        Ok(None)
    }

    /// Mint (or reuse) an installation token for an organization with an
    /// active app integration.
    async fn installation_token_for_org(&self, organization: &str) -> Result<Option<String>> {
        if organization.is_empty() {
            return Ok(None);
        }

        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(organization) {
                if cached.expires_at - Duration::seconds(60) > Utc::now() {
                    return Ok(Some(cached.token.clone()));
                }
            }
        }

        let integration = sqlx::query_as::<_, IntegrationConfig>(
            r#"
            SELECT app_id, private_key FROM integration_configs
            WHERE provider = 'github' AND github_organization = $1 AND status = 'active'
            LIMIT 1
            "#,
        )
        .bind(organization)
        .fetch_optional(&self.pool)
        .await?;

        let Some(integration) = integration else {
            return Ok(None);
        };
        let (Some(app_id), Some(private_key)) = (integration.app_id, integration.private_key)
        else {
            return Ok(None);
        };

        let jwt = github::sign_app_jwt(app_id.trim(), private_key.trim(), Utc::now())?;
        let app_client = match &self.github_base_url {
            Some(base) => github::GitHubAppClient::with_base_url(jwt, base.clone()),
            None => github::GitHubAppClient::new(jwt),
        };

        let Some(installation) = app_client.find_installation_for_org(organization).await? else {
            tracing::warn!(org = organization, "no app installation found");
            return Ok(None);
        };

        let minted = app_client.create_installation_token(installation.id).await?;

        let mut cache = self.cache.lock().await;
        cache.insert(
            organization.to_string(),
            CachedToken {
                token: minted.token.clone(),
                expires_at: minted.expires_at,
            },
        );

        Ok(Some(minted.token))
    }

    /// The owner's stored OAuth token, if present, unexpired and (when
    /// enforcement is on) carrying the required scopes.
    async fn user_token(&self, user_id: i64, operation: TokenOperation) -> Result<Option<String>> {
        let profile = sqlx::query_as::<_, UserProfileToken>(
            r#"
            SELECT github_token, github_token_expires_at, github_scopes
            FROM user_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(profile) = profile else {
            return Ok(None);
        };
        let Some(token) = profile.github_token else {
            return Ok(None);
        };

        if let Some(expires_at) = profile.github_token_expires_at {
            if expires_at <= Utc::now() {
                tracing::warn!(user_id, "user token expired");
                return Ok(None);
            }
        }

        if self.enforce_scopes {
            let required = scopes_for_operation(operation);
            if !has_required_scopes(&profile.github_scopes, required) {
                tracing::warn!(user_id, ?required, "user token missing required scopes");
                return Ok(None);
            }
        }

        Ok(Some(token))
    }
}
