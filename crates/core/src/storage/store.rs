//! Storage traits for scripts and executions.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{
    CreateScriptRequest, Execution, ExecutionFilter, ExecutionOutcome, ExecutionStatus,
    NewExecution, Script, UpdateScriptRequest,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Cannot move execution {id} from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Storage for saved scripts. Every lookup is scoped to an owner.
pub trait ScriptStore: Send + Sync {
    /// Save a new script. Fails with `Conflict` if the owner already has one
    /// with the same name.
    fn create(&self, request: CreateScriptRequest) -> Result<Script, StoreError>;

    /// Get a script by id if it belongs to `owner`.
    fn get_owned(&self, id: i64, owner: &str) -> Result<Option<Script>, StoreError>;

    /// List an owner's scripts, most recently updated first.
    fn list(&self, owner: &str, limit: i64, offset: i64) -> Result<Vec<Script>, StoreError>;

    /// Count an owner's scripts.
    fn count(&self, owner: &str) -> Result<i64, StoreError>;

    /// Update name and/or code of an owned script.
    fn update(
        &self,
        id: i64,
        owner: &str,
        request: UpdateScriptRequest,
    ) -> Result<Script, StoreError>;

    /// Delete an owned script and its executions. Returns the deleted script.
    fn delete(&self, id: i64, owner: &str) -> Result<Script, StoreError>;

    /// Record that an execution of the script succeeded at `at`.
    fn touch_last_executed(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Storage for execution records.
///
/// Only the runner owning an execution mutates it, at start and at its
/// terminal checkpoint.
pub trait ExecutionStore: Send + Sync {
    /// Record a new `pending` execution.
    fn create(&self, request: NewExecution) -> Result<Execution, StoreError>;

    /// Get an execution by id.
    fn get(&self, id: i64) -> Result<Option<Execution>, StoreError>;

    /// Move a pending execution to `running`.
    fn mark_running(&self, id: i64) -> Result<Execution, StoreError>;

    /// Move a non-terminal execution to a terminal status, stamping `finished_at`.
    fn finish(
        &self,
        id: i64,
        status: ExecutionStatus,
        outcome: ExecutionOutcome,
    ) -> Result<Execution, StoreError>;

    /// List executions matching the filter, newest first.
    fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError>;

    /// Count executions matching the filter (ignores limit/offset).
    fn count(&self, filter: &ExecutionFilter) -> Result<i64, StoreError>;
}
