//! Scope-to-operation mapping.
//!
//! The table is closed: every operation kind the indexer performs maps to a
//! fixed scope list. Whether the scopes are enforced when selecting a user
//! token is a configuration choice (`ENFORCE_TOKEN_SCOPES`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOperation {
    Basic,
    PublicRepos,
    PrivateRepos,
    UserInfo,
    OrgAccess,
    CodeScanning,
    FullAccess,
}

/// OAuth scopes required for an operation.
pub fn scopes_for_operation(operation: TokenOperation) -> &'static [&'static str] {
    match operation {
        TokenOperation::Basic => &[],
        TokenOperation::PublicRepos => &["public_repo"],
        TokenOperation::PrivateRepos => &["repo"],
        TokenOperation::UserInfo => &["user:email"],
        TokenOperation::OrgAccess => &["read:org"],
        TokenOperation::CodeScanning => &["security_events"],
        TokenOperation::FullAccess => &["repo", "user:email", "read:org"],
    }
}

/// Whether `granted` covers every scope in `required`.
pub fn has_required_scopes(granted: &[String], required: &[&str]) -> bool {
    required
        .iter()
        .all(|scope| granted.iter().any(|g| g == scope))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_table_is_closed() {
        assert!(scopes_for_operation(TokenOperation::Basic).is_empty());
        assert_eq!(
            scopes_for_operation(TokenOperation::PublicRepos),
            &["public_repo"][..]
        );
        assert_eq!(
            scopes_for_operation(TokenOperation::PrivateRepos),
            &["repo"][..]
        );
        assert_eq!(
            scopes_for_operation(TokenOperation::UserInfo),
            &["user:email"][..]
        );
        assert_eq!(
            scopes_for_operation(TokenOperation::OrgAccess),
            &["read:org"][..]
        );
        assert_eq!(
            scopes_for_operation(TokenOperation::CodeScanning),
            &["security_events"][..]
        );
        assert_eq!(
            scopes_for_operation(TokenOperation::FullAccess),
            &["repo", "user:email", "read:org"][..]
        );
    }

    #[test]
    fn scope_check_requires_all() {
        let granted = vec!["repo".to_string(), "user:email".to_string()];
        assert!(has_required_scopes(&granted, &["repo"]));
        assert!(has_required_scopes(&granted, &["repo", "user:email"]));
        assert!(!has_required_scopes(&granted, &["read:org"]));
        assert!(has_required_scopes(&granted, &[]));
    }
}
