pub mod auth;
pub mod config;
pub mod events;
pub mod executor;
pub mod queue;
pub mod runner;
pub mod storage;
pub mod testing;
pub mod validation;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    NoneAuthenticator, ANONYMOUS_USER,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig, DEFAULT_QUEUE, SCRIPT_QUEUE,
};
pub use events::{
    session_topic, EventBus, EventReceiver, EventSender, JobEvent, StepStatus, GLOBAL_TOPIC,
    JOB_EVENTS_TOPIC,
};
pub use executor::{
    ArtifactError, ArtifactStore, ExecutionResult, ExecutorError, FsArtifactStore, ScriptExecutor,
    SplashExecutor,
};
pub use queue::{Job, JobFailure, JobHandle, JobQueue, JobState, JobStatus, QueueError, QueueStats};
pub use runner::{RunnerContext, ScriptJob, ScriptPayload, Step};
pub use storage::{
    CreateScriptRequest, Execution, ExecutionFilter, ExecutionOutcome, ExecutionStatus,
    ExecutionStore, NewExecution, Script, ScriptStore, SqliteStore, StoreError,
    UpdateScriptRequest,
};
pub use validation::{validate_args, validate_script, ScriptValidationError};
