// Local-clone commit ingestion: shallow scratch clones, git log parsing,
// and the KLOC derivation that piggybacks on a completed backfill.

pub mod git_service;
pub mod kloc;
pub mod sync;

pub use git_service::{GitService, GitServiceError};
