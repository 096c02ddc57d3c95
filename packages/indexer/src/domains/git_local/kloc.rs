//! KLOC (kilo-lines of code) derivation.
//!
//! Computed from a local clone after a completed backfill, at most once per
//! 30 days per repository: enumerate tracked files, keep known code
//! extensions, count lines ignoring decode errors, aggregate by language,
//! append one history row. History rows are never mutated.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::Duration;

use crate::domains::indexing::models::{Repository, RepositoryKlocHistory};
use crate::domains::tokens::TokenOperation;
use crate::kernel::IndexerDeps;

use super::git_service::GitService;

/// Recompute only when the newest history row is older than this.
pub const KLOC_MAX_AGE_DAYS: i64 = 30;

const CODE_EXTENSIONS: [&str; 44] = [
    "py", "pyx", "pyi", "js", "jsx", "ts", "tsx", "java", "c", "cpp", "cc", "cxx", "h", "hpp",
    "cs", "php", "rb", "erb", "rake", "go", "rs", "swift", "kt", "kts", "scala", "clj", "cljs",
    "hs", "fs", "vb", "sql", "sh", "bash", "zsh", "r", "m", "pl", "pm", "lua", "dart", "elm",
    "ex", "exs", "cr",
];

fn language_name(extension: &str) -> String {
    match extension {
        "py" | "pyx" | "pyi" => "Python".to_string(),
        "js" | "jsx" => "JavaScript".to_string(),
        "ts" | "tsx" => "TypeScript".to_string(),
        "java" => "Java".to_string(),
        "c" | "h" => "C".to_string(),
        "cpp" | "cc" | "cxx" | "hpp" => "C++".to_string(),
        "cs" => "C#".to_string(),
        "php" => "PHP".to_string(),
        "rb" | "erb" | "rake" => "Ruby".to_string(),
        "go" => "Go".to_string(),
        "rs" => "Rust".to_string(),
        "swift" => "Swift".to_string(),
        "kt" | "kts" => "Kotlin".to_string(),
        "scala" => "Scala".to_string(),
        "clj" | "cljs" => "Clojure".to_string(),
        "hs" => "Haskell".to_string(),
        "fs" => "F#".to_string(),
        "vb" => "Visual Basic".to_string(),
        "sql" => "SQL".to_string(),
        "sh" | "bash" | "zsh" => "Shell".to_string(),
        "r" => "R".to_string(),
        "m" => "MATLAB".to_string(),
        "pl" | "pm" => "Perl".to_string(),
        "lua" => "Lua".to_string(),
        "dart" => "Dart".to_string(),
        "elm" => "Elm".to_string(),
        "ex" | "exs" => "Elixir".to_string(),
        "cr" => "Crystal".to_string(),
        other => other.to_uppercase(),
    }
}

fn code_extension(path: &str) -> Option<&str> {
    let extension = Path::new(path).extension()?.to_str()?;
    let lowered_matches = CODE_EXTENSIONS
        .iter()
        .any(|e| e.eq_ignore_ascii_case(extension));
    lowered_matches.then_some(extension)
}

#[derive(Debug, Clone, Default)]
pub struct KlocData {
    pub kloc: f64,
    pub total_lines: i64,
    pub total_files: i64,
    pub code_files: i64,
    pub language_breakdown: BTreeMap<String, i64>,
}

/// Count lines across the tracked code files of a clone. Unreadable files
/// are skipped; decode errors are ignored via lossy reads.
pub async fn calculate_kloc(repo_path: &Path, tracked_files: &[String]) -> KlocData {
    let mut data = KlocData {
        total_files: tracked_files.len() as i64,
        ..Default::default()
    };

    for file in tracked_files {
        let Some(extension) = code_extension(file) else {
            continue;
        };
        let language = language_name(&extension.to_lowercase());

        let path = repo_path.join(file);
        let lines = match tokio::fs::read(&path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).lines().count() as i64,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "error counting lines");
                continue;
            }
        };

        data.code_files += 1;
        data.total_lines += lines;
        *data.language_breakdown.entry(language).or_insert(0) += lines;
    }

    data.kloc = data.total_lines as f64 / 1000.0;
    data
}

/// Compute KLOC from an existing clone and append a history row.
pub async fn compute_for_clone(
    deps: &IndexerDeps,
    repository: &Repository,
    git: &GitService,
) -> Result<RepositoryKlocHistory> {
    let repo_path = git.repo_path(&repository.full_name)?;
    let tracked = git.list_tracked_files(&repository.full_name).await?;
    let data = calculate_kloc(&repo_path, &tracked).await;

    let now = deps.clock.now();
    let row = RepositoryKlocHistory::append(
        repository.id,
        &repository.full_name,
        data.kloc,
        data.total_lines,
        serde_json::to_value(&data.language_breakdown)?,
        data.total_files,
        data.code_files,
        now,
        &deps.db_pool,
    )
    .await?;

    tracing::info!(
        repository = %repository.full_name,
        kloc = format!("{:.2}", data.kloc),
        total_lines = data.total_lines,
        "KLOC calculation completed"
    );

    Ok(row)
}

/// Ensure a fresh KLOC record exists, cloning if necessary. Called from the
/// API commit pipeline once a backfill completes; a no-op while the latest
/// record is younger than 30 days. The scratch clone is removed on every
/// path.
pub async fn ensure_fresh_kloc(deps: &IndexerDeps, repository: &Repository) -> Result<()> {
    let now = deps.clock.now();
    if repository
        .has_recent_kloc(Duration::days(KLOC_MAX_AGE_DAYS), now, &deps.db_pool)
        .await?
    {
        tracing::info!(repository = %repository.full_name, "KLOC is recent, skipping recalculation");
        return Ok(());
    }

    let token = deps
        .tokens
        .token_for_repository(
            &repository.full_name,
            repository.owner_id,
            TokenOperation::PrivateRepos,
        )
        .await?
        .map(|t| t.token);

    let git = GitService::new(deps.config.scratch_dir.clone());
    let result = async {
        git.clone_repository(&repository.clone_url, &repository.full_name, token.as_deref())
            .await?;
        compute_for_clone(deps, repository, &git).await
    }
    .await;

    git.cleanup(&repository.full_name).await;
    result.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn code_extension_filtering() {
        assert!(code_extension("src/main.rs").is_some());
        assert!(code_extension("app/views.py").is_some());
        assert!(code_extension("query.SQL").is_some());
        assert!(code_extension("README.md").is_none());
        assert!(code_extension("image.png").is_none());
        assert!(code_extension("Makefile").is_none());
    }

    #[test]
    fn language_names_map_known_extensions() {
        assert_eq!(language_name("rs"), "Rust");
        assert_eq!(language_name("py"), "Python");
        assert_eq!(language_name("tsx"), "TypeScript");
        assert_eq!(language_name("zig"), "ZIG");
    }

    #[tokio::test]
    async fn kloc_counts_lines_by_language() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}\n// two\n// three\n").unwrap();
        fs::write(dir.path().join("util.py"), "x = 1\ny = 2\n").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored\n").unwrap();

        let tracked = vec![
            "main.rs".to_string(),
            "util.py".to_string(),
            "notes.md".to_string(),
        ];
        let data = calculate_kloc(dir.path(), &tracked).await;

        assert_eq!(data.total_files, 3);
        assert_eq!(data.code_files, 2);
        assert_eq!(data.total_lines, 5);
        assert_eq!(data.language_breakdown["Rust"], 3);
        assert_eq!(data.language_breakdown["Python"], 2);
        assert!((data.kloc - 0.005).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let tracked = vec!["missing.rs".to_string()];
        let data = calculate_kloc(dir.path(), &tracked).await;
        assert_eq!(data.code_files, 0);
        assert_eq!(data.total_lines, 0);
    }

    #[tokio::test]
    async fn binary_content_is_counted_lossily() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("weird.rs"), [0xFF, 0xFE, b'\n', 0x80, b'x']).unwrap();

        let tracked = vec!["weird.rs".to_string()];
        let data = calculate_kloc(dir.path(), &tracked).await;
        assert_eq!(data.code_files, 1);
        assert_eq!(data.total_lines, 2);
    }
}
