//! Result returned by a script executor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::unix_timestamp;

/// Outcome of one script execution.
///
/// Always produced, even when the endpoint is unreachable; `script_executed`
/// tells success from failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub script_executed: bool,
    /// Float seconds since the Unix epoch.
    pub timestamp: f64,
    /// Arguments as supplied by the caller.
    pub args_provided: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splash_response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_error: Option<String>,
}

impl ExecutionResult {
    pub fn success(args: &Map<String, Value>, splash_response: Value) -> Self {
        Self {
            script_executed: true,
            timestamp: unix_timestamp(),
            args_provided: Value::Object(args.clone()),
            splash_response: Some(splash_response),
            error: None,
            details: None,
            screenshot_url: None,
            screenshot_error: None,
        }
    }

    pub fn failure(args: &Map<String, Value>, error: impl Into<String>) -> Self {
        Self {
            script_executed: false,
            timestamp: unix_timestamp(),
            args_provided: Value::Object(args.clone()),
            splash_response: None,
            error: Some(error.into()),
            details: None,
            screenshot_url: None,
            screenshot_error: None,
        }
    }

    pub fn with_details(mut self, details: Option<String>) -> Self {
        self.details = details;
        self
    }

    pub fn with_splash_response(mut self, response: Value) -> Self {
        self.splash_response = Some(response);
        self
    }

    pub fn is_success(&self) -> bool {
        self.script_executed
    }

    /// Error message, or a generic one for failures that carry none.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown error")
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
