//! Job registry for deserializing and executing jobs.
//!
//! Maps job type strings (e.g. "index_commits") to handlers that
//! reconstruct the typed argument struct from JSON and run the work. The
//! runner claims rows from the queue and dispatches through here without
//! knowing concrete types.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;

use super::queue::ClaimedJob;
use crate::kernel::IndexerDeps;

/// Type alias for the async handler function.
type BoxedHandler = Box<
    dyn Fn(serde_json::Value, Arc<IndexerDeps>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

struct JobRegistration {
    handler: BoxedHandler,
}

/// Registry that maps job type strings to handlers.
///
/// # Example
///
/// ```ignore
/// let mut registry = JobRegistry::new();
/// registry.register::<IndexRepositoryArgs, _, _>("index_commits", |args, deps| async move {
///     tasks::index_commits_task(&deps, args.repository_id).await
/// });
/// ```
#[derive(Default)]
pub struct JobRegistry {
    registrations: HashMap<&'static str, JobRegistration>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Register a job type with its handler. The handler receives the
    /// deserialized argument struct and the dependency container.
    pub fn register<A, F, Fut>(&mut self, job_type: &'static str, handler: F)
    where
        A: DeserializeOwned + Send + Sync + 'static,
        F: Fn(A, Arc<IndexerDeps>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed_handler: BoxedHandler = Box::new(move |value, deps| {
            let handler = handler.clone();
            Box::pin(async move {
                let args: A = serde_json::from_value(value)
                    .map_err(|e| anyhow!("failed to deserialize {}: {}", job_type, e))?;
                handler(args, deps).await
            })
        });

        self.registrations
            .insert(job_type, JobRegistration { handler: boxed_handler });
    }

    /// Execute a claimed job using its registered handler.
    pub async fn execute(&self, job: &ClaimedJob, deps: Arc<IndexerDeps>) -> Result<()> {
        let job_type = job.job_type();
        let registration = self
            .registrations
            .get(job_type)
            .ok_or_else(|| anyhow!("unknown job type: {}", job_type))?;

        let args = job
            .job
            .args
            .clone()
            .unwrap_or(serde_json::Value::Null);

        (registration.handler)(args, deps).await
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.registrations.contains_key(job_type)
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        self.registrations.keys().copied().collect()
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedJobRegistry = Arc<JobRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TestArgs {
        #[allow(dead_code)]
        repository_id: i64,
    }

    #[test]
    fn register_and_check() {
        let mut registry = JobRegistry::new();
        registry.register::<TestArgs, _, _>("test_job", |_args, _deps| async move { Ok(()) });

        assert!(registry.is_registered("test_job"));
        assert!(!registry.is_registered("unknown_job"));
    }

    #[test]
    fn registered_types_lists_entries() {
        let mut registry = JobRegistry::new();
        registry.register::<TestArgs, _, _>("test_job", |_args, _deps| async move { Ok(()) });

        let types = registry.registered_types();
        assert!(types.contains(&"test_job"));
    }
}
