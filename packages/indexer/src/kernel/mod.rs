// Kernel - core infrastructure with dependency injection
//
// The kernel holds infrastructure only: the dependency container, the job
// queue/runner, and the cron schedules. Business logic belongs in the
// domain layers.

pub mod deps;
pub mod jobs;
pub mod scheduled_tasks;

pub use deps::IndexerDeps;
