//! Inputs of a script job.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::storage::StoreError;

/// A step declared by the client, reported back in progress events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub title: String,
    /// Line of the comment the step was extracted from.
    #[serde(
        rename = "commentLine",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub comment_line: Option<u32>,
}

impl Step {
    pub fn new(index: usize, title: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            comment_line: None,
        }
    }
}

/// Everything one execution needs, captured at enqueue time.
#[derive(Debug, Clone)]
pub struct ScriptPayload {
    pub session_id: String,
    /// Validated, trimmed script source.
    pub script: String,
    pub args: Map<String, Value>,
    pub steps: Vec<Step>,
    /// Persisted execution to keep in sync, if any.
    pub execution_id: Option<i64>,
}

/// Faults outside the executor that abort a run.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
