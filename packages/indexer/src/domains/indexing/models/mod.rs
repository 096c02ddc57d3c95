pub mod codeql;
pub mod commit;
pub mod deployment;
pub mod indexing_state;
pub mod kloc;
pub mod pull_request;
pub mod release;
pub mod repository;
pub mod sync_log;

pub use codeql::CodeQlVulnerability;
pub use commit::Commit;
pub use deployment::Deployment;
pub use indexing_state::{IndexingState, IndexingStatus};
pub use kloc::RepositoryKlocHistory;
pub use pull_request::PullRequest;
pub use release::Release;
pub use repository::Repository;
pub use sync_log::SyncLog;
