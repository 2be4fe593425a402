//! Types for the job queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a job did not run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    /// The job exceeded its queue's timeout and was dropped.
    TimedOut(Duration),
    /// The queue stopped before a worker picked the job up.
    Shutdown,
    /// The queue shut down while the job was running and its grace period ran out.
    Interrupted,
    /// `run` panicked; carries the panic message.
    Panicked(String),
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::TimedOut(limit) => write!(f, "Job timed out after {}s", limit.as_secs()),
            JobFailure::Shutdown => f.write_str("Job queue shut down before the job ran"),
            JobFailure::Interrupted => f.write_str("Job interrupted by queue shutdown"),
            JobFailure::Panicked(message) => write!(f, "Job panicked: {}", message),
        }
    }
}

/// A unit of background work carrying its own arguments.
#[async_trait]
pub trait Job: Send + Sync {
    /// Short description used in logs and job status.
    fn label(&self) -> String {
        "job".to_string()
    }

    /// Do the work.
    async fn run(&self);

    /// Called instead of (or after an aborted) `run` when the job cannot finish.
    async fn fail(&self, failure: JobFailure);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue '{0}' is not accepting jobs")]
    Unavailable(String),

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),
}

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::Failed | JobState::TimedOut
        )
    }
}

/// Snapshot of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub queue: String,
    pub label: String,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobStatus {
    /// Seconds spent running, once finished.
    pub fn run_secs(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// Aggregate statistics for one named queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub name: String,
    pub workers: usize,
    pub timeout_secs: u64,
    pub accepting: bool,
    /// Jobs waiting for a worker.
    pub queued: u64,
    /// Jobs currently running.
    pub active: u64,
    /// Jobs that ran to completion since startup.
    pub processed: u64,
    /// Jobs that panicked or were shut down.
    pub failed: u64,
    pub timed_out: u64,
}
