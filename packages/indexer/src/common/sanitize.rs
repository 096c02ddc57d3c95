//! Input validation guarding store queries and scratch-directory paths.

use anyhow::{anyhow, bail, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

lazy_static! {
    static ref REPO_FULL_NAME: Regex =
        Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("pattern compiles");
}

/// Validate `owner/repo` format with safe characters only. Every
/// repository-name query parameter must pass through here before reaching
/// the store.
pub fn assert_safe_repository_full_name(full_name: &str) -> Result<()> {
    if !REPO_FULL_NAME.is_match(full_name) {
        bail!("invalid repository full name: {:?}", full_name);
    }
    Ok(())
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Resolve the scratch directory for a repository clone.
///
/// The result must be a direct child of `root`; anything else (traversal,
/// absolute components surviving sanitization) is rejected.
pub fn scratch_dir_for(root: &Path, full_name: &str) -> Result<PathBuf> {
    let dir_name = format!("gitpulse_{}", sanitize_component(full_name));
    let path = root.join(&dir_name);

    if path.parent() != Some(root) {
        return Err(anyhow!("scratch path escapes root: {}", path.display()));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(anyhow!("scratch path contains traversal: {}", path.display()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_names() {
        assert!(assert_safe_repository_full_name("rust-lang/rust").is_ok());
        assert!(assert_safe_repository_full_name("octo_org/repo.name").is_ok());
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in [
            "",
            "norepo",
            "owner/repo/extra",
            "owner/repo name",
            "owner/$(rm -rf)",
            "owner/{\"$ne\":1}",
            "../etc/passwd",
        ] {
            assert!(
                assert_safe_repository_full_name(bad).is_err(),
                "expected rejection: {:?}",
                bad
            );
        }
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_component("owner/repo"), "owner_repo");
        assert_eq!(sanitize_component("a b;c"), "a_b_c");
        assert_eq!(sanitize_component("ok.name-1_2"), "ok.name-1_2");
    }

    #[test]
    fn scratch_dir_is_a_direct_child_of_root() {
        let root = PathBuf::from("/tmp");
        let dir = scratch_dir_for(&root, "owner/repo").unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/gitpulse_owner_repo"));
        assert_eq!(dir.parent(), Some(root.as_path()));
    }

    #[test]
    fn scratch_dir_neutralizes_traversal_attempts() {
        let root = PathBuf::from("/tmp");
        let dir = scratch_dir_for(&root, "../../etc/passwd").unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/gitpulse_.._.._etc_passwd"));
        assert!(dir.starts_with(&root));
    }
}
