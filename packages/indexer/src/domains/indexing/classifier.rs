//! Deterministic commit classification.
//!
//! Assigns one of fix|feature|docs|refactor|test|style|perf|ci|chore|other
//! from the commit message and changed file list. Precedence: conventional
//! prefix, then message keywords, then file-path heuristics.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CONVENTIONAL_PREFIX: Regex = Regex::new(
        r"(?i)^(fix|feat|feature|docs?|refactor|test|style|perf|ci|chore|build)(\([^)]*\))?!?:"
    )
    .expect("pattern compiles");

    /// Keyword patterns checked in order; word boundaries keep short tokens
    /// like "ci" from matching inside words ("dependencies").
    static ref KEYWORD_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("fix", Regex::new(r"(?i)\b(fix(es|ed)?|bug|bugfix|hotfix|patch(es|ed)?|resolve[sd]?)\b").unwrap()),
        ("feature", Regex::new(r"(?i)\b(add(s|ed)?|feature|implement(s|ed)?|introduce[sd]?)\b").unwrap()),
        ("docs", Regex::new(r"(?i)\b(docs?|documentation|readme|changelog)\b").unwrap()),
        ("refactor", Regex::new(r"(?i)\b(refactor(s|ed|ing)?|restructure[sd]?|rework(s|ed)?|rename[sd]?|extract(s|ed)?)\b").unwrap()),
        ("test", Regex::new(r"(?i)\b(tests?|spec|coverage)\b").unwrap()),
        ("style", Regex::new(r"(?i)\b(format(s|ted|ting)?|lint(s|ed)?|whitespace|typo(s)?)\b").unwrap()),
        ("perf", Regex::new(r"(?i)\b(performance|optimi[sz]e[sd]?|speedup|faster)\b").unwrap()),
        ("ci", Regex::new(r"(?i)\b(ci|pipeline|workflow|github actions?)\b").unwrap()),
        ("chore", Regex::new(r"(?i)\b(bump(s|ed)?|upgrade[sd]?|dependenc(y|ies)|version|release[sd]?|merge)\b").unwrap()),
    ];
}

const CI_PATH_MARKERS: [&str; 6] = [
    ".github/workflows",
    ".gitlab-ci",
    ".circleci",
    "jenkinsfile",
    ".travis.yml",
    "azure-pipelines",
];

const CHORE_FILES: [&str; 8] = [
    "package-lock.json",
    "yarn.lock",
    "cargo.lock",
    "poetry.lock",
    "gemfile.lock",
    ".gitignore",
    "renovate.json",
    "dependabot.yml",
];

fn from_prefix(message: &str) -> Option<&'static str> {
    let captures = CONVENTIONAL_PREFIX.captures(message.trim())?;
    let keyword = captures.get(1)?.as_str().to_lowercase();
    Some(match keyword.as_str() {
        "fix" => "fix",
        "feat" | "feature" => "feature",
        "doc" | "docs" => "docs",
        "refactor" => "refactor",
        "test" => "test",
        "style" => "style",
        "perf" => "perf",
        "ci" => "ci",
        "chore" | "build" => "chore",
        _ => return None,
    })
}

fn from_keywords(message: &str) -> Option<&'static str> {
    KEYWORD_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(message))
        .map(|(kind, _)| *kind)
}

fn from_files(files: &[String]) -> Option<&'static str> {
    if files.is_empty() {
        return None;
    }

    let lowered: Vec<String> = files.iter().map(|f| f.to_lowercase()).collect();

    let all_docs = lowered.iter().all(|f| {
        f.ends_with(".md")
            || f.ends_with(".rst")
            || f.ends_with(".txt")
            || f.starts_with("docs/")
    });
    if all_docs {
        return Some("docs");
    }

    let all_ci = lowered
        .iter()
        .all(|f| CI_PATH_MARKERS.iter().any(|marker| f.contains(marker)));
    if all_ci {
        return Some("ci");
    }

    let all_tests = lowered.iter().all(|f| {
        f.contains("test") || f.contains("spec") || f.starts_with("tests/")
    });
    if all_tests {
        return Some("test");
    }

    let all_chore = lowered.iter().all(|f| {
        CHORE_FILES
            .iter()
            .any(|name| f == name || f.ends_with(&format!("/{name}")))
    });
    if all_chore {
        return Some("chore");
    }

    None
}

/// Classify a commit from its message and changed file names.
pub fn classify_commit(message: &str, files: &[String]) -> &'static str {
    if let Some(kind) = from_prefix(message) {
        return kind;
    }
    if let Some(kind) = from_keywords(message) {
        return kind;
    }
    if let Some(kind) = from_files(files) {
        return kind;
    }
    "other"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn conventional_prefixes_win() {
        assert_eq!(classify_commit("fix: broken pagination", &[]), "fix");
        assert_eq!(classify_commit("feat(api): cursor windows", &[]), "feature");
        assert_eq!(classify_commit("docs: update readme", &[]), "docs");
        assert_eq!(classify_commit("perf!: faster upserts", &[]), "perf");
        assert_eq!(classify_commit("chore(deps): bump serde", &[]), "chore");
        assert_eq!(classify_commit("ci: cache builds", &[]), "ci");
    }

    #[test]
    fn prefix_beats_keywords() {
        // "add" would classify as feature by keyword; prefix takes priority.
        assert_eq!(classify_commit("fix: add missing null check", &[]), "fix");
    }

    #[test]
    fn keywords_classify_unprefixed_messages() {
        assert_eq!(classify_commit("Fixed crash on empty window", &[]), "fix");
        assert_eq!(classify_commit("Implement deployment polling", &[]), "feature");
        assert_eq!(classify_commit("Rework scheduler internals", &[]), "refactor");
        assert_eq!(classify_commit("Optimize upsert batches", &[]), "perf");
        assert_eq!(classify_commit("Bump dependencies", &[]), "chore");
    }

    #[test]
    fn short_tokens_match_on_word_boundaries_only() {
        // "dependencies" contains the substring "ci"; it must not match.
        assert_eq!(classify_commit("Pin dependencies", &[]), "chore");
        // "latest" contains "test".
        assert_eq!(classify_commit("Bump to latest version", &[]), "chore");
        assert_eq!(classify_commit("Speed up CI runs", &[]), "ci");
    }

    #[test]
    fn file_heuristics_cover_silent_messages() {
        assert_eq!(
            classify_commit("update", &files(&["README.md", "docs/guide.md"])),
            "docs"
        );
        assert_eq!(
            classify_commit("update", &files(&[".github/workflows/ci.yml"])),
            "ci"
        );
        assert_eq!(
            classify_commit("update", &files(&["tests/test_api.py"])),
            "test"
        );
        assert_eq!(
            classify_commit("update", &files(&["Cargo.lock"])),
            "chore"
        );
    }

    #[test]
    fn unclassifiable_commits_are_other() {
        assert_eq!(classify_commit("wip", &files(&["src/lib.rs"])), "other");
        assert_eq!(classify_commit("", &[]), "other");
    }

    #[test]
    fn classification_is_deterministic() {
        let message = "Refactor window derivation";
        let changed = files(&["src/window.rs"]);
        let first = classify_commit(message, &changed);
        for _ in 0..10 {
            assert_eq!(classify_commit(message, &changed), first);
        }
    }
}
