//! Background job queues.

mod pool;
mod types;

pub use pool::{JobFinishedCallback, JobHandle, JobQueue};
pub use types::{Job, JobFailure, JobState, JobStatus, QueueError, QueueStats};
