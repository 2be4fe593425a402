//! Splash `/execute` client.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;

use super::artifact::{decode_png, screenshot_file_name, ArtifactError, ArtifactStore, SCREENSHOT_DIR};
use super::harness::wrap_script;
use super::{ExecutionResult, ExecutorError, ScriptExecutor};

/// Longest error body kept in `details`.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Keys the executor sets itself; everything else the caller passes through.
const RESERVED_KEYS: [&str; 4] = ["url", "wait", "html", "png"];

/// Executes scripts on a Splash-compatible HTTP endpoint.
pub struct SplashExecutor {
    client: Client,
    config: ExecutorConfig,
    artifacts: Arc<dyn ArtifactStore>,
}

impl SplashExecutor {
    pub fn new(
        config: ExecutorConfig,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Result<Self, ExecutorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ExecutorError::Client(e.to_string()))?;

        Ok(Self {
            client,
            config,
            artifacts,
        })
    }

    /// Build the JSON body posted to the endpoint.
    pub fn build_payload(&self, script: &str, args: &Map<String, Value>) -> Value {
        let mut payload = Map::new();
        payload.insert("lua_source".to_string(), Value::String(wrap_script(script)));
        payload.insert(
            "url".to_string(),
            args.get("url")
                .cloned()
                .unwrap_or_else(|| Value::String(self.config.default_target_url.clone())),
        );
        payload.insert(
            "wait".to_string(),
            args.get("wait")
                .cloned()
                .unwrap_or_else(|| Value::from(self.config.default_wait)),
        );
        payload.insert(
            "html".to_string(),
            args.get("html").cloned().unwrap_or(Value::from(1)),
        );
        payload.insert(
            "png".to_string(),
            args.get("png").cloned().unwrap_or(Value::from(1)),
        );

        for (key, value) in args {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                payload.insert(key.clone(), value.clone());
            }
        }

        payload.insert("args".to_string(), Value::Object(args.clone()));
        Value::Object(payload)
    }

    async fn save_screenshot(&self, png: &Value) -> Result<String, ArtifactError> {
        let data = png
            .as_str()
            .ok_or_else(|| ArtifactError::Decode("png field is not a string".to_string()))?;
        let bytes = decode_png(data)?;
        let key = format!("{}/{}", SCREENSHOT_DIR, screenshot_file_name());
        self.artifacts.put(&key, &bytes).await
    }

    /// Turn a 2xx JSON body into a result, storing any screenshot.
    async fn classify_body(&self, args: &Map<String, Value>, body: Value) -> ExecutionResult {
        let Some(fields) = body.as_object() else {
            return ExecutionResult::failure(args, "Unexpected response from Splash")
                .with_splash_response(body);
        };

        let has_error = fields.get("error").is_some_and(is_truthy);
        let has_errors = fields.get("errors").is_some_and(is_truthy);

        if has_error || has_errors {
            let message = fields
                .get("error")
                .filter(|v| is_truthy(v))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "Unknown Splash error".to_string());
            let details = fields.get("description").map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });

            error!(error = %message, "Script failed in Splash");
            return ExecutionResult::failure(args, message)
                .with_details(details)
                .with_splash_response(body);
        }

        let png = fields.get("png").filter(|v| is_truthy(v)).cloned();
        let mut result = ExecutionResult::success(args, body);

        if let Some(png) = png {
            match self.save_screenshot(&png).await {
                Ok(url) => {
                    info!(url = %url, "Screenshot saved");
                    result.screenshot_url = Some(url);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to save screenshot");
                    result.screenshot_error = Some(e.to_string());
                }
            }
        }

        result
    }
}

#[async_trait]
impl ScriptExecutor for SplashExecutor {
    async fn execute(&self, script: &str, args: &Map<String, Value>) -> ExecutionResult {
        let payload = self.build_payload(script, args);
        debug!(endpoint = %self.config.endpoint_url, "Posting script to Splash");

        let response = match self
            .client
            .post(&self.config.endpoint_url)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let message = format!("Connection error with Splash: {}", e);
                error!(error = %e, "Splash request failed");
                return ExecutionResult::failure(args, message);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let details = truncate_chars(&body, MAX_ERROR_BODY_CHARS);
            error!(status = status.as_u16(), body = %details, "Splash returned an error status");
            return ExecutionResult::failure(args, format!("Splash error: HTTP {}", status.as_u16()))
                .with_details(Some(details));
        }

        match response.json::<Value>().await {
            Ok(body) => {
                let result = self.classify_body(args, body).await;
                if result.is_success() {
                    info!("Script executed successfully");
                }
                result
            }
            Err(e) => {
                error!(error = %e, "Splash returned an unparseable body");
                ExecutionResult::failure(args, format!("Invalid response from Splash: {}", e))
            }
        }
    }
}

/// Loose truthiness: null, false, 0, "" and empty containers are false.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
