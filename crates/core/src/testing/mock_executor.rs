//! Mock script executor for testing.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::executor::{ExecutionResult, ScriptExecutor};

#[derive(Debug, Clone)]
enum Behavior {
    Succeed(Value),
    Fail { error: String, details: Option<String> },
    Panic(String),
}

/// A recorded call for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub script: String,
    pub args: Map<String, Value>,
}

/// Mock implementation of [`ScriptExecutor`].
///
/// Returns a canned result, optionally after a delay, and records every call.
#[derive(Debug, Clone)]
pub struct MockExecutor {
    behavior: Behavior,
    delay: Duration,
    screenshot_url: Option<String>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockExecutor {
    /// Always succeed with `splash_response`.
    pub fn succeeding(splash_response: Value) -> Self {
        Self::with_behavior(Behavior::Succeed(splash_response))
    }

    /// Always return an error result with this message.
    pub fn failing(error: impl Into<String>) -> Self {
        Self::with_behavior(Behavior::Fail {
            error: error.into(),
            details: None,
        })
    }

    /// Panic inside `execute`.
    pub fn panicking(message: impl Into<String>) -> Self {
        Self::with_behavior(Behavior::Panic(message.into()))
    }

    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            screenshot_url: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Attach error details to a failing mock.
    pub fn with_details(mut self, text: impl Into<String>) -> Self {
        if let Behavior::Fail { details, .. } = &mut self.behavior {
            *details = Some(text.into());
        }
        self
    }

    /// Report a stored screenshot on success.
    pub fn with_screenshot_url(mut self, url: impl Into<String>) -> Self {
        self.screenshot_url = Some(url.into());
        self
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ScriptExecutor for MockExecutor {
    async fn execute(&self, script: &str, args: &Map<String, Value>) -> ExecutionResult {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                script: script.to_string(),
                args: args.clone(),
            });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.behavior {
            Behavior::Succeed(response) => {
                let mut result = ExecutionResult::success(args, response.clone());
                result.screenshot_url = self.screenshot_url.clone();
                result
            }
            Behavior::Fail { error, details } => {
                ExecutionResult::failure(args, error.clone()).with_details(details.clone())
            }
            Behavior::Panic(message) => panic!("{}", message),
        }
    }
}
