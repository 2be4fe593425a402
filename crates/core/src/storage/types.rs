//! Persisted records: saved scripts and their executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A script saved by a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Script {
    pub id: i64,
    /// User id of the owner.
    pub owner: String,
    /// Descriptive name, unique per owner.
    pub name: String,
    /// Script source.
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time an execution of this script succeeded.
    pub last_executed_at: Option<DateTime<Utc>>,
}

/// Request to save a new script.
#[derive(Debug, Clone)]
pub struct CreateScriptRequest {
    pub owner: String,
    pub name: String,
    pub code: String,
}

/// Partial update of a saved script.
#[derive(Debug, Clone, Default)]
pub struct UpdateScriptRequest {
    pub name: Option<String>,
    pub code: Option<String>,
}

/// Lifecycle status of an execution.
///
/// `pending -> running -> {success, error}`; the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Error)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "error" => Ok(ExecutionStatus::Error),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// One run of a script.
///
/// `finished_at` is set if and only if `status` is terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: i64,
    /// Saved script this run belongs to (None for ad-hoc runs).
    pub script_id: Option<i64>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Arguments the script was enqueued with.
    pub request_args: serde_json::Value,
    /// Result payload produced by the executor.
    pub response_data: Option<serde_json::Value>,
    /// Free-text log; holds the error message on failure.
    pub logs: String,
    pub screenshot_url: Option<String>,
}

impl Execution {
    /// Seconds between start and finish, None until terminal.
    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Request to record a new pending execution.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub script_id: Option<i64>,
    pub request_args: serde_json::Value,
}

/// Data persisted when an execution reaches a terminal state.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub response_data: Option<serde_json::Value>,
    pub logs: String,
    pub screenshot_url: Option<String>,
}

/// Filter for listing executions.
#[derive(Debug, Clone)]
pub struct ExecutionFilter {
    /// Only executions of this script.
    pub script_id: Option<i64>,
    /// Only executions of scripts owned by this user.
    pub owner: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionFilter {
    pub fn new() -> Self {
        Self {
            script_id: None,
            owner: None,
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_script_id(mut self, script_id: i64) -> Self {
        self.script_id = Some(script_id);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("done".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Error.is_terminal());
    }

    #[test]
    fn test_duration_only_when_finished() {
        let started_at = Utc::now();
        let mut execution = Execution {
            id: 1,
            script_id: None,
            status: ExecutionStatus::Running,
            started_at,
            finished_at: None,
            request_args: serde_json::json!({}),
            response_data: None,
            logs: String::new(),
            screenshot_url: None,
        };
        assert!(execution.duration_secs().is_none());

        execution.status = ExecutionStatus::Success;
        execution.finished_at = Some(started_at + Duration::milliseconds(2500));
        assert_eq!(execution.duration_secs(), Some(2.5));
    }
}
