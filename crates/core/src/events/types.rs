//! Lifecycle events emitted by the job runner.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Topic every connection joins on connect.
pub const GLOBAL_TOPIC: &str = "notifications";

/// Topic receiving every job runner event, regardless of session.
pub const JOB_EVENTS_TOPIC: &str = "notifications_lua";

/// Topic name for one session.
pub fn session_topic(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// Wall-clock time as float seconds since the Unix epoch.
pub fn unix_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Status of one declared step, as reported in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Error => "error",
        }
    }
}

/// Event published by a job runner for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEvent {
    Progress {
        session_id: String,
        step_index: usize,
        step_title: String,
        status: StepStatus,
        log: Option<String>,
        timestamp: f64,
    },
    /// Terminal: the executor returned a successful result.
    Completed {
        session_id: String,
        success: bool,
        result: serde_json::Value,
        error: Option<String>,
        timestamp: f64,
    },
    /// Terminal: the execution failed, timed out or faulted.
    Error {
        session_id: String,
        error: String,
        details: Option<String>,
        timestamp: f64,
    },
}

impl JobEvent {
    pub fn progress(
        session_id: &str,
        step_index: usize,
        step_title: impl Into<String>,
        status: StepStatus,
        log: Option<String>,
    ) -> Self {
        JobEvent::Progress {
            session_id: session_id.to_string(),
            step_index,
            step_title: step_title.into(),
            status,
            log,
            timestamp: unix_timestamp(),
        }
    }

    pub fn completed(session_id: &str, result: serde_json::Value) -> Self {
        JobEvent::Completed {
            session_id: session_id.to_string(),
            success: true,
            result,
            error: None,
            timestamp: unix_timestamp(),
        }
    }

    pub fn error(session_id: &str, error: impl Into<String>, details: Option<String>) -> Self {
        JobEvent::Error {
            session_id: session_id.to_string(),
            error: error.into(),
            details,
            timestamp: unix_timestamp(),
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            JobEvent::Progress { session_id, .. }
            | JobEvent::Completed { session_id, .. }
            | JobEvent::Error { session_id, .. } => session_id,
        }
    }

    /// Whether this is the last event of a job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Error { .. })
    }

    /// Short label, used for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Progress { .. } => "progress",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_topic() {
        assert_eq!(session_topic("abc"), "session:abc");
    }

    #[test]
    fn test_timestamp_is_fractional_seconds() {
        let ts = unix_timestamp();
        // After 2020-01-01 and well below a millisecond epoch
        assert!(ts > 1_577_836_800.0);
        assert!(ts < 1.0e11);
    }

    #[test]
    fn test_event_accessors() {
        let progress = JobEvent::progress("s1", 0, "Starting execution", StepStatus::Running, None);
        assert_eq!(progress.session_id(), "s1");
        assert!(!progress.is_terminal());
        assert_eq!(progress.kind(), "progress");

        let completed = JobEvent::completed("s1", json!({"ok": 1}));
        assert!(completed.is_terminal());
        match completed {
            JobEvent::Completed { success, error, .. } => {
                assert!(success);
                assert!(error.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let error = JobEvent::error("s1", "boom", Some("trace".to_string()));
        assert!(error.is_terminal());
        assert_eq!(error.kind(), "error");
    }

    #[test]
    fn test_step_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(StepStatus::Pending).unwrap(),
            json!("pending")
        );
        assert_eq!(StepStatus::Error.as_str(), "error");
    }
}
