//! Pure GitHub REST API client.
//!
//! A minimal client for the subset of the GitHub v3 API the indexer consumes:
//! commits, pull requests, releases, deployments, code-scanning alerts, the
//! rate-limit probe, and the GitHub App installation-token flow.
//!
//! The client owns HTTP concerns only: URLs, headers, pagination parameters
//! and status-code classification. Date filtering beyond what the API
//! supports, persistence and scheduling all belong to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use github::GitHubClient;
//!
//! let client = GitHubClient::new(Some("ghs_token".into()));
//! let commits = client.list_commits("rust-lang", "rust", since, until, 1).await?;
//! ```

pub mod error;
pub mod types;

pub use error::{GitHubError, Result};
pub use types::*;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use serde::de::DeserializeOwned;

const BASE_URL: &str = "https://api.github.com";
const ACCEPT_V3: &str = "application/vnd.github.v3+json";
const ACCEPT_APP: &str = "application/vnd.github+json";
const USER_AGENT: &str = concat!("GitPulse/", env!("CARGO_PKG_VERSION"));

/// Items requested per page everywhere; callers stop on a short page.
pub const PER_PAGE: u32 = 100;

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubClient {
    /// Create a client. `token` is sent as `Authorization: token <t>`;
    /// `None` still works for public repositories.
    pub fn new(token: Option<String>) -> Self {
        Self::with_base_url(token, BASE_URL.to_string())
    }

    /// Create a client against a non-default API root (GitHub Enterprise,
    /// test servers).
    pub fn with_base_url(token: Option<String>, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut req = self
            .client
            .get(&url)
            .header("Accept", ACCEPT_V3)
            .header("User-Agent", USER_AGENT)
            .query(query);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("token {}", token));
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let reset_at = resp
                .headers()
                .get("x-ratelimit-reset")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<i64>().ok())
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(%url, status = status.as_u16(), "GitHub API error response");
            return Err(GitHubError::from_status_with_reset(
                status.as_u16(),
                body,
                reset_at,
            ));
        }

        Ok(resp.json::<T>().await?)
    }

    // ------------------------------------------------------------------
    // Rate limit
    // ------------------------------------------------------------------

    /// Snapshot the core rate budget for this client's credential.
    pub async fn rate_limit(&self) -> Result<RateLimitSnapshot> {
        let url = format!("{}/rate_limit", self.base_url);
        let resp: RateLimitResponse = self.get_json(url, &[]).await?;
        Ok(resp.resources.core)
    }

    // ------------------------------------------------------------------
    // Commits
    // ------------------------------------------------------------------

    /// List commits in `[since, until]`, newest first. One page per call.
    pub async fn list_commits(
        &self,
        owner: &str,
        repo: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        page: u32,
    ) -> Result<Vec<CommitSummary>> {
        let url = format!("{}/repos/{}/{}/commits", self.base_url, owner, repo);
        self.get_json(
            url,
            &[
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
                ("since", since.to_rfc3339()),
                ("until", until.to_rfc3339()),
            ],
        )
        .await
    }

    /// Fetch one commit with its file-change stats.
    pub async fn get_commit(&self, owner: &str, repo: &str, sha: &str) -> Result<CommitDetail> {
        let url = format!("{}/repos/{}/{}/commits/{}", self.base_url, owner, repo, sha);
        self.get_json(url, &[]).await
    }

    // ------------------------------------------------------------------
    // Pull requests
    // ------------------------------------------------------------------

    /// List pull requests in all states, sorted by creation date descending.
    pub async fn list_pulls(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<PullRequestSummary>> {
        let url = format!("{}/repos/{}/{}/pulls", self.base_url, owner, repo);
        self.get_json(
            url,
            &[
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
                ("state", "all".to_string()),
                ("sort", "created".to_string()),
                ("direction", "desc".to_string()),
            ],
        )
        .await
    }

    pub async fn get_pull(&self, owner: &str, repo: &str, number: i64) -> Result<PullRequestDetail> {
        let url = format!("{}/repos/{}/{}/pulls/{}", self.base_url, owner, repo, number);
        self.get_json(url, &[]).await
    }

    /// Review comments on a pull request (one page).
    pub async fn list_review_comments(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        page: u32,
    ) -> Result<Vec<Comment>> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/comments",
            self.base_url, owner, repo, number
        );
        self.get_json(
            url,
            &[
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    /// Conversation comments on the pull request's issue (one page).
    pub async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        page: u32,
    ) -> Result<Vec<Comment>> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.base_url, owner, repo, number
        );
        self.get_json(
            url,
            &[
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    // ------------------------------------------------------------------
    // Releases
    // ------------------------------------------------------------------

    pub async fn list_releases(&self, owner: &str, repo: &str, page: u32) -> Result<Vec<Release>> {
        let url = format!("{}/repos/{}/{}/releases", self.base_url, owner, repo);
        self.get_json(
            url,
            &[
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    // ------------------------------------------------------------------
    // Deployments
    // ------------------------------------------------------------------

    /// List deployments (the API has no server-side date filter).
    pub async fn list_deployments(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<Deployment>> {
        let url = format!("{}/repos/{}/{}/deployments", self.base_url, owner, repo);
        self.get_json(
            url,
            &[
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    pub async fn list_deployment_statuses(
        &self,
        owner: &str,
        repo: &str,
        deployment_id: i64,
    ) -> Result<Vec<DeploymentStatus>> {
        let url = format!(
            "{}/repos/{}/{}/deployments/{}/statuses",
            self.base_url, owner, repo, deployment_id
        );
        self.get_json(url, &[]).await
    }

    // ------------------------------------------------------------------
    // Code scanning
    // ------------------------------------------------------------------

    /// List code-scanning alerts in one state, newest first.
    pub async fn list_code_scanning_alerts(
        &self,
        owner: &str,
        repo: &str,
        state: &str,
        page: u32,
    ) -> Result<Vec<CodeScanningAlert>> {
        let url = format!(
            "{}/repos/{}/{}/code-scanning/alerts",
            self.base_url, owner, repo
        );
        self.get_json(
            url,
            &[
                ("state", state.to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
                ("sort", "created".to_string()),
                ("direction", "desc".to_string()),
            ],
        )
        .await
    }
}

// ============================================================================
// GitHub App authentication
// ============================================================================

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Build the short-lived RS256 assertion for a GitHub App.
///
/// `iat` is backdated 60 s for clock skew; `exp` stays under the 10-minute
/// API maximum.
pub fn sign_app_jwt(app_id: &str, private_key_pem: &str, now: DateTime<Utc>) -> Result<String> {
    let claims = AppClaims {
        iat: (now - Duration::seconds(60)).timestamp(),
        exp: (now + Duration::minutes(9)).timestamp(),
        iss: app_id.to_string(),
    };
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())?;
    Ok(jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        &claims,
        &key,
    )?)
}

/// App-level endpoints, authenticated with a signed assertion instead of a
/// token. Kept separate from [`GitHubClient`] because the header scheme and
/// Accept media type differ.
#[derive(Debug, Clone)]
pub struct GitHubAppClient {
    client: reqwest::Client,
    base_url: String,
    jwt: String,
}

impl GitHubAppClient {
    pub fn new(jwt: String) -> Self {
        Self::with_base_url(jwt, BASE_URL.to_string())
    }

    pub fn with_base_url(jwt: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            jwt,
        }
    }

    /// Page through the app's installations.
    pub async fn list_installations(&self, page: u32) -> Result<Vec<Installation>> {
        let url = format!("{}/app/installations", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.jwt))
            .header("Accept", ACCEPT_APP)
            .header("User-Agent", USER_AGENT)
            .query(&[
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GitHubError::from_status(status.as_u16(), body));
        }

        Ok(resp.json().await?)
    }

    /// Find the installation whose account login matches `organization`
    /// (case-insensitive), paging until found or exhausted.
    pub async fn find_installation_for_org(
        &self,
        organization: &str,
    ) -> Result<Option<Installation>> {
        let wanted = organization.to_lowercase();
        let mut page = 1;
        loop {
            let installations = self.list_installations(page).await?;
            if installations.is_empty() {
                return Ok(None);
            }
            let short_page = installations.len() < PER_PAGE as usize;
            for installation in installations {
                let login = installation
                    .account
                    .as_ref()
                    .map(|a| a.login.to_lowercase())
                    .unwrap_or_default();
                if login == wanted {
                    return Ok(Some(installation));
                }
            }
            if short_page {
                return Ok(None);
            }
            page += 1;
        }
    }

    /// Mint an installation access token.
    pub async fn create_installation_token(
        &self,
        installation_id: i64,
    ) -> Result<InstallationToken> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.base_url, installation_id
        );
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.jwt))
            .header("Accept", ACCEPT_APP)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GitHubError::from_status(status.as_u16(), body));
        }

        let token: InstallationToken = resp.json().await?;
        if token.token.is_empty() {
            return Err(GitHubError::AppAuth(
                "GitHub did not return an installation token".to_string(),
            ));
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_carries_crate_version() {
        assert!(USER_AGENT.starts_with("GitPulse/"));
    }

    #[test]
    fn client_defaults_to_public_api_root() {
        let client = GitHubClient::new(None);
        assert_eq!(client.base_url(), "https://api.github.com");
    }
}
