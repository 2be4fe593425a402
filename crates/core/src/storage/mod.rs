//! Relational storage for saved scripts and execution history.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteStore;
pub use store::{ExecutionStore, ScriptStore, StoreError};
pub use types::{
    CreateScriptRequest, Execution, ExecutionFilter, ExecutionOutcome, ExecutionStatus,
    NewExecution, Script, UpdateScriptRequest,
};
