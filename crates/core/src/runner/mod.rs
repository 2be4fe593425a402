//! Script job runner.

mod job;
mod types;

pub use job::{RunnerContext, ScriptJob};
pub use types::{RunnerError, ScriptPayload, Step};
