use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GitHubError>;

/// Errors returned by the GitHub client.
///
/// Status codes are folded into variants that matter to callers: 404/422 and
/// "feature disabled" 403s become `NotFoundOrDisabled`, other 401/403s become
/// `PermissionDenied`, 429 becomes `RateLimited`, everything else keeps its
/// raw status in `Api`.
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("resource not found or feature disabled ({status}): {message}")]
    NotFoundOrDisabled { status: u16, message: String },

    #[error("permission denied ({status}): {message}")]
    PermissionDenied { status: u16, message: String },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Upstream reset time, when the response carried one.
        reset_at: Option<DateTime<Utc>>,
    },

    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("app assertion signing failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("app authentication failed: {0}")]
    AppAuth(String),
}

impl GitHubError {
    /// Classify a non-success response into an error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        Self::from_status_with_reset(status, body, None)
    }

    /// Classify a non-success response, attaching the rate-limit reset time
    /// (from the `x-ratelimit-reset` header) to rate-limited outcomes.
    pub fn from_status_with_reset(
        status: u16,
        body: String,
        reset_at: Option<DateTime<Utc>>,
    ) -> Self {
        let lowered = body.to_lowercase();
        match status {
            404 | 422 => GitHubError::NotFoundOrDisabled {
                status,
                message: body,
            },
            403 if lowered.contains("code scanning not enabled")
                || lowered.contains("advanced security") =>
            {
                GitHubError::NotFoundOrDisabled {
                    status,
                    message: body,
                }
            }
            429 => GitHubError::RateLimited {
                message: body,
                reset_at,
            },
            403 if lowered.contains("rate limit") => GitHubError::RateLimited {
                message: body,
                reset_at,
            },
            401 | 403 => GitHubError::PermissionDenied {
                status,
                message: body,
            },
            _ => GitHubError::Api {
                status,
                message: body,
            },
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GitHubError::Api { status, .. } => *status >= 500,
            GitHubError::Transport(_) => true,
            GitHubError::RateLimited { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_statuses_map_to_not_found_or_disabled() {
        assert!(matches!(
            GitHubError::from_status(404, "Not Found".into()),
            GitHubError::NotFoundOrDisabled { status: 404, .. }
        ));
        assert!(matches!(
            GitHubError::from_status(422, "Unprocessable".into()),
            GitHubError::NotFoundOrDisabled { status: 422, .. }
        ));
    }

    #[test]
    fn feature_off_403_maps_to_not_found_or_disabled() {
        let err = GitHubError::from_status(403, "Code scanning not enabled for this repo".into());
        assert!(matches!(err, GitHubError::NotFoundOrDisabled { .. }));

        let err = GitHubError::from_status(403, "Advanced Security must be enabled".into());
        assert!(matches!(err, GitHubError::NotFoundOrDisabled { .. }));
    }

    #[test]
    fn plain_403_and_401_map_to_permission_denied() {
        assert!(matches!(
            GitHubError::from_status(403, "Forbidden".into()),
            GitHubError::PermissionDenied { .. }
        ));
        assert!(matches!(
            GitHubError::from_status(401, "Bad credentials".into()),
            GitHubError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn rate_limit_statuses_map_to_rate_limited() {
        assert!(matches!(
            GitHubError::from_status(429, "too many requests".into()),
            GitHubError::RateLimited { .. }
        ));
        assert!(matches!(
            GitHubError::from_status(403, "API rate limit exceeded".into()),
            GitHubError::RateLimited { .. }
        ));
    }

    #[test]
    fn rate_limited_carries_the_reset_time_when_known() {
        let reset = DateTime::parse_from_rfc3339("2024-06-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        match GitHubError::from_status_with_reset(429, "slow down".into(), Some(reset)) {
            GitHubError::RateLimited { reset_at, .. } => assert_eq!(reset_at, Some(reset)),
            other => panic!("expected rate limited, got {:?}", other),
        }
        match GitHubError::from_status(429, "slow down".into()) {
            GitHubError::RateLimited { reset_at, .. } => assert_eq!(reset_at, None),
            other => panic!("expected rate limited, got {:?}", other),
        }
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(GitHubError::from_status(502, "bad gateway".into()).is_transient());
        assert!(!GitHubError::from_status(404, "nope".into()).is_transient());
        assert!(!GitHubError::from_status(401, "nope".into()).is_transient());
    }
}
