// Background job infrastructure: queue, registry, runner.

pub mod job;
pub mod queue;
pub mod registry;
pub mod runner;

pub use job::{ErrorKind, Job, JobStatus};
pub use queue::{
    enqueue_command, schedule_command, ClaimedJob, CommandMeta, EnqueueResult, JobQueue,
    PostgresJobQueue,
};
pub use registry::{JobRegistry, SharedJobRegistry};
pub use runner::{JobRunner, JobRunnerConfig};
