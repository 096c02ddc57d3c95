// Incremental indexing: durable per-(repo, entity) state, the entity
// pipelines, and the job handlers that wire them to the queue.

pub mod classifier;
pub mod models;
pub mod pipelines;
pub mod tasks;
