// Entity pipelines. All share the skeleton: load repo → state gate → rate
// gate → begin (CAS) → fetch window → upsert → prune → complete → follow-up
// intent. Pipelines never touch the scheduler; they return intents and the
// task layer acts on them.

pub mod codeql;
pub mod commits;
pub mod deployments;
pub mod outcome;
pub mod pull_requests;
pub mod releases;
mod support;

pub use outcome::{FollowUp, IndexOutcome, IndexReport};
