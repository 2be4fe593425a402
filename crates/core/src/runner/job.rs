//! Job driving one script execution end to end.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::events::{session_topic, EventBus, JobEvent, StepStatus, JOB_EVENTS_TOPIC};
use crate::executor::{ExecutionResult, ScriptExecutor};
use crate::queue::{Job, JobFailure};
use crate::storage::{ExecutionOutcome, ExecutionStatus, ExecutionStore, ScriptStore, StoreError};

use super::{RunnerError, ScriptPayload};

const STARTING_TITLE: &str = "Starting execution";
const PREPARING_TITLE: &str = "Preparing script";

/// Shared collaborators for script jobs.
#[derive(Clone)]
pub struct RunnerContext {
    pub executor: Arc<dyn ScriptExecutor>,
    pub executions: Arc<dyn ExecutionStore>,
    pub scripts: Arc<dyn ScriptStore>,
    pub bus: EventBus,
    /// Pause after the first event so a client subscribing right after
    /// enqueue can join the session topic.
    pub subscribe_grace: Duration,
}

impl RunnerContext {
    pub fn job(&self, payload: ScriptPayload) -> ScriptJob {
        ScriptJob {
            topic: session_topic(&payload.session_id),
            track_execution: AtomicBool::new(payload.execution_id.is_some()),
            payload,
            ctx: self.clone(),
            terminal_sent: AtomicBool::new(false),
        }
    }
}

/// Runs a script and reports its lifecycle on the event bus.
///
/// State machine: `pending -> running -> {success, error}`. Exactly one of
/// `completed` / `error` is emitted per job, whatever path ends it.
pub struct ScriptJob {
    payload: ScriptPayload,
    ctx: RunnerContext,
    topic: String,
    track_execution: AtomicBool,
    terminal_sent: AtomicBool,
}

impl ScriptJob {
    pub fn session_id(&self) -> &str {
        &self.payload.session_id
    }

    fn emit(&self, event: JobEvent) {
        let delivered = self
            .ctx
            .bus
            .multicast(&[self.topic.as_str(), JOB_EVENTS_TOPIC], event);
        debug!(session_id = %self.payload.session_id, delivered, "Event published");
    }

    fn emit_progress(&self, index: usize, title: &str, status: StepStatus, log: Option<String>) {
        self.emit(JobEvent::progress(
            &self.payload.session_id,
            index,
            title,
            status,
            log,
        ));
    }

    fn emit_steps(&self, status: StepStatus, log: Option<&str>) {
        for step in &self.payload.steps {
            self.emit_progress(step.index, &step.title, status, log.map(str::to_string));
        }
    }

    fn execution_id(&self) -> Option<i64> {
        if self.track_execution.load(Ordering::SeqCst) {
            self.payload.execution_id
        } else {
            None
        }
    }

    async fn drive(&self) -> Result<(), RunnerError> {
        let session_id = &self.payload.session_id;
        info!(session_id = %session_id, "Starting script job");

        if let Some(id) = self.payload.execution_id {
            match self.ctx.executions.mark_running(id) {
                Ok(_) => {}
                Err(StoreError::NotFound { .. }) => {
                    warn!(session_id = %session_id, execution_id = id, "Execution not found, running untracked");
                    self.track_execution.store(false, Ordering::SeqCst);
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.emit_progress(0, STARTING_TITLE, StepStatus::Running, None);

        if !self.ctx.subscribe_grace.is_zero() {
            tokio::time::sleep(self.ctx.subscribe_grace).await;
        }

        self.emit_steps(StepStatus::Pending, None);
        self.emit_progress(0, PREPARING_TITLE, StepStatus::Running, None);

        let result = self
            .ctx
            .executor
            .execute(&self.payload.script, &self.payload.args)
            .await;

        if result.is_success() {
            self.complete(result)
        } else {
            let message = result.error_message().to_string();
            error!(session_id = %session_id, error = %message, "Script execution failed");
            self.fail_with(&message, result.details.clone(), Some(result.to_json()));
            Ok(())
        }
    }

    /// Success branch: persist, sweep steps, emit `completed`.
    fn complete(&self, result: ExecutionResult) -> Result<(), RunnerError> {
        if self.terminal_sent.load(Ordering::SeqCst) {
            return Ok(());
        }

        let response = result.to_json();
        if let Some(id) = self.execution_id() {
            let execution = self.ctx.executions.finish(
                id,
                ExecutionStatus::Success,
                ExecutionOutcome {
                    response_data: Some(response.clone()),
                    logs: String::new(),
                    screenshot_url: result.screenshot_url.clone(),
                },
            )?;

            if let Some(script_id) = execution.script_id {
                if let Err(e) = self.ctx.scripts.touch_last_executed(script_id, Utc::now()) {
                    warn!(script_id, error = %e, "Failed to update last execution time");
                }
            }
        }

        if self.terminal_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.emit_steps(StepStatus::Success, None);
        self.emit(JobEvent::completed(&self.payload.session_id, response));
        info!(session_id = %self.payload.session_id, "Script job completed");
        Ok(())
    }

    /// Failure branch: persist, sweep steps, emit `error`.
    ///
    /// Persistence problems are logged; the event is always sent.
    fn fail_with(&self, message: &str, details: Option<String>, response: Option<serde_json::Value>) {
        if self.terminal_sent.swap(true, Ordering::SeqCst) {
            debug!(session_id = %self.payload.session_id, "Terminal event already sent");
            return;
        }

        if let Some(id) = self.execution_id() {
            let outcome = ExecutionOutcome {
                response_data: response,
                logs: message.to_string(),
                screenshot_url: None,
            };
            if let Err(e) = self.ctx.executions.finish(id, ExecutionStatus::Error, outcome) {
                error!(execution_id = id, error = %e, "Failed to persist execution error");
            }
        }

        self.emit_steps(StepStatus::Error, Some(message));
        self.emit(JobEvent::error(&self.payload.session_id, message, details));
    }
}

#[async_trait]
impl Job for ScriptJob {
    fn label(&self) -> String {
        format!("script session={}", self.payload.session_id)
    }

    async fn run(&self) {
        if let Err(e) = self.drive().await {
            let message = format!("Internal job error: {}", e);
            error!(session_id = %self.payload.session_id, error = %e, "Script job faulted");
            self.fail_with(&message, None, None);
        }
    }

    async fn fail(&self, failure: JobFailure) {
        let message = failure.to_string();
        warn!(session_id = %self.payload.session_id, reason = %message, "Script job aborted");
        self.fail_with(&message, None, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventReceiver;
    use crate::runner::Step;
    use crate::storage::{CreateScriptRequest, NewExecution, SqliteStore};
    use crate::config::ExecutorConfig;
    use crate::executor::SplashExecutor;
    use crate::testing::{spawn_fake_splash, MockArtifactStore, MockExecutor};
    use axum::http::StatusCode;
    use serde_json::{json, Map, Value};
    use tokio::sync::mpsc;

    struct Harness {
        store: Arc<SqliteStore>,
        bus: EventBus,
        executor: Arc<MockExecutor>,
    }

    impl Harness {
        fn new(executor: MockExecutor) -> Self {
            Self {
                store: Arc::new(SqliteStore::in_memory().unwrap()),
                bus: EventBus::new(),
                executor: Arc::new(executor),
            }
        }

        fn ctx(&self) -> RunnerContext {
            RunnerContext {
                executor: self.executor.clone(),
                executions: self.store.clone(),
                scripts: self.store.clone(),
                bus: self.bus.clone(),
                subscribe_grace: Duration::ZERO,
            }
        }

        fn subscribe(&self, session_id: &str) -> EventReceiver {
            let (tx, rx) = mpsc::unbounded_channel();
            self.bus.group_add(&session_topic(session_id), "test-conn", tx);
            rx
        }
    }

    fn payload(session_id: &str, execution_id: Option<i64>) -> ScriptPayload {
        ScriptPayload {
            session_id: session_id.to_string(),
            script: "function main(splash, args) return {} end".to_string(),
            args: Map::new(),
            steps: vec![Step::new(1, "Open page"), Step::new(2, "Read title")],
            execution_id,
        }
    }

    fn drain(rx: &mut EventReceiver) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn statuses(events: &[JobEvent]) -> Vec<(usize, StepStatus)> {
        events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Progress {
                    step_index, status, ..
                } => Some((*step_index, *status)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_success_event_sequence() {
        let harness = Harness::new(MockExecutor::succeeding(json!({"title": "x"})));
        let mut rx = harness.subscribe("s1");

        harness.ctx().job(payload("s1", None)).run().await;

        let events = drain(&mut rx);
        assert_eq!(
            statuses(&events),
            vec![
                (0, StepStatus::Running),
                (1, StepStatus::Pending),
                (2, StepStatus::Pending),
                (0, StepStatus::Running),
                (1, StepStatus::Success),
                (2, StepStatus::Success),
            ]
        );
        let last = events.last().unwrap();
        assert!(matches!(last, JobEvent::Completed { success: true, .. }));
        assert!(events.iter().all(|e| e.session_id() == "s1"));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_error_result_marks_steps_and_persists() {
        let harness = Harness::new(MockExecutor::failing("Splash error: HTTP 500"));
        let execution = ExecutionStore::create(
            harness.store.as_ref(),
            NewExecution {
                script_id: None,
                request_args: json!({}),
            },
        )
        .unwrap();
        let mut rx = harness.subscribe("s2");

        harness
            .ctx()
            .job(payload("s2", Some(execution.id)))
            .run()
            .await;

        let events = drain(&mut rx);
        match events.last().unwrap() {
            JobEvent::Error { error, .. } => assert_eq!(error, "Splash error: HTTP 500"),
            other => panic!("unexpected terminal event: {:?}", other),
        }
        let error_steps: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, JobEvent::Progress { status: StepStatus::Error, log: Some(_), .. }))
            .collect();
        assert_eq!(error_steps.len(), 2);

        let stored = ExecutionStore::get(harness.store.as_ref(), execution.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Error);
        assert_eq!(stored.logs, "Splash error: HTTP 500");
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_success_touches_script() {
        let harness = Harness::new(MockExecutor::succeeding(json!({})));
        let script = ScriptStore::create(
            harness.store.as_ref(),
            CreateScriptRequest {
                owner: "alice".to_string(),
                name: "s".to_string(),
                code: "function main() end".to_string(),
            },
        )
        .unwrap();
        let execution = ExecutionStore::create(
            harness.store.as_ref(),
            NewExecution {
                script_id: Some(script.id),
                request_args: json!({}),
            },
        )
        .unwrap();

        harness
            .ctx()
            .job(payload("s3", Some(execution.id)))
            .run()
            .await;

        let stored = ExecutionStore::get(harness.store.as_ref(), execution.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert!(stored.response_data.is_some());

        let script = harness.store.get_owned(script.id, "alice").unwrap().unwrap();
        assert!(script.last_executed_at.is_some());
    }

    #[tokio::test]
    async fn test_store_fault_becomes_internal_error() {
        let harness = Harness::new(MockExecutor::succeeding(json!({})));
        let execution = ExecutionStore::create(
            harness.store.as_ref(),
            NewExecution {
                script_id: None,
                request_args: json!({}),
            },
        )
        .unwrap();
        // Already terminal: mark_running is an invalid transition
        harness
            .store
            .finish(execution.id, ExecutionStatus::Error, ExecutionOutcome::default())
            .unwrap();
        let mut rx = harness.subscribe("s4");

        harness
            .ctx()
            .job(payload("s4", Some(execution.id)))
            .run()
            .await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        match events.last().unwrap() {
            JobEvent::Error { error, .. } => assert!(error.starts_with("Internal job error:")),
            other => panic!("unexpected terminal event: {:?}", other),
        }
        assert!(harness.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_execution_runs_untracked() {
        let harness = Harness::new(MockExecutor::succeeding(json!({})));
        let mut rx = harness.subscribe("s5");

        harness.ctx().job(payload("s5", Some(4242))).run().await;

        let events = drain(&mut rx);
        assert!(matches!(events.last().unwrap(), JobEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn test_timeout_after_completion_sends_no_second_terminal() {
        let harness = Harness::new(MockExecutor::succeeding(json!({})));
        let mut rx = harness.subscribe("s6");
        let job = harness.ctx().job(payload("s6", None));

        job.run().await;
        job.fail(JobFailure::TimedOut(Duration::from_secs(1))).await;

        let events = drain(&mut rx);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_fail_before_run_emits_error() {
        let harness = Harness::new(MockExecutor::succeeding(json!({})));
        let mut rx = harness.subscribe("s7");
        let job = harness.ctx().job(payload("s7", None));

        job.fail(JobFailure::Shutdown).await;

        let events = drain(&mut rx);
        match events.last().unwrap() {
            JobEvent::Error { error, .. } => {
                assert_eq!(error, "Job queue shut down before the job ran")
            }
            other => panic!("unexpected terminal event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_screenshot_still_completes_once() {
        let splash =
            spawn_fake_splash(StatusCode::OK, json!({"title": "x", "png": "%%%"})).await;
        let artifacts = Arc::new(MockArtifactStore::new());
        let executor = SplashExecutor::new(
            ExecutorConfig {
                endpoint_url: splash.url(),
                request_timeout_secs: 5,
                ..Default::default()
            },
            Arc::clone(&artifacts) as _,
        )
        .unwrap();
        let harness = Harness::new(MockExecutor::succeeding(json!({})));
        let ctx = RunnerContext {
            executor: Arc::new(executor),
            ..harness.ctx()
        };
        let mut rx = harness.subscribe("s9");

        ctx.job(payload("s9", None)).run().await;

        let events = drain(&mut rx);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(!events.iter().any(|e| matches!(e, JobEvent::Error { .. })));
        match events.last().unwrap() {
            JobEvent::Completed {
                success, result, ..
            } => {
                assert!(*success);
                assert!(result["screenshot_error"].is_string());
                assert!(result.get("screenshot_url").map_or(true, Value::is_null));
                assert_eq!(result["splash_response"]["title"], json!("x"));
            }
            other => panic!("unexpected terminal event: {:?}", other),
        }
        assert!(artifacts.stored().is_empty());
    }

    #[tokio::test]
    async fn test_events_reach_global_job_topic() {
        let harness = Harness::new(MockExecutor::succeeding(json!({})));
        let (tx, mut global) = mpsc::unbounded_channel();
        harness.bus.group_add(JOB_EVENTS_TOPIC, "dashboard", tx);

        harness.ctx().job(payload("s8", None)).run().await;

        let events = drain(&mut global);
        assert!(!events.is_empty());
        assert!(events.last().unwrap().is_terminal());
    }
}
