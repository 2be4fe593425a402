//! Script execution against a remote browser-automation endpoint.

mod artifact;
mod harness;
mod splash;
mod types;

pub use artifact::{
    decode_png, screenshot_file_name, ArtifactError, ArtifactStore, FsArtifactStore,
    SCREENSHOT_DIR,
};
pub use harness::{wrap_script, MISSING_MAIN_ERROR};
pub use splash::SplashExecutor;
pub use types::ExecutionResult;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

/// Runs a script with arguments and reports the outcome.
///
/// Never fails: transport and endpoint problems come back as a result with
/// `script_executed == false`.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, script: &str, args: &Map<String, Value>) -> ExecutionResult;
}
