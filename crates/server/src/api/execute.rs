//! Script enqueue endpoint.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use scriptrelay_core::{
    validate_args, validate_script, ExecutionOutcome, ExecutionStatus, NewExecution,
    ScriptPayload, Step, SCRIPT_QUEUE,
};

use super::{middleware::AuthUser, ApiError};
use crate::metrics::JOBS_ENQUEUED_TOTAL;
use crate::state::AppState;

const ENQUEUED_MESSAGE: &str = "Script enqueued for execution";

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub steps: Option<Vec<Step>>,
    #[serde(default)]
    pub script_id: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub session_id: String,
    pub job_id: String,
    pub status: &'static str,
    pub message: &'static str,
}

/// Validate a script and enqueue it on the script queue.
///
/// Progress and results are delivered over the WebSocket gateway to
/// subscribers of the returned session id.
pub async fn execute_script(
    State(state): State<Arc<AppState>>,
    AuthUser(identity): AuthUser,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::Validation(e.body_text()))?;

    let script = validate_script(&body.script)?.to_string();
    let args = validate_args(body.args)?;

    let execution_id = match body.script_id {
        Some(script_id) => {
            if identity.is_anonymous() {
                return Err(ApiError::Validation(
                    "script_id requires authentication".to_string(),
                ));
            }
            let owned = state
                .scripts()
                .get_owned(script_id, &identity.user_id)?
                .ok_or_else(|| {
                    ApiError::NotFound(
                        "Script not found or not owned by the caller".to_string(),
                    )
                })?;
            let execution = state.executions().create(NewExecution {
                script_id: Some(owned.id),
                request_args: Value::Object(args.clone()),
            })?;
            Some(execution.id)
        }
        None => None,
    };

    let session_id = body
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let job = state.runner().job(ScriptPayload {
        session_id: session_id.clone(),
        script,
        args,
        steps: body.steps.unwrap_or_default(),
        execution_id,
    });

    let handle = match state.queue().enqueue(SCRIPT_QUEUE, Box::new(job)).await {
        Ok(handle) => handle,
        Err(e) => {
            if let Some(id) = execution_id {
                let outcome = ExecutionOutcome {
                    logs: e.to_string(),
                    ..ExecutionOutcome::default()
                };
                if let Err(store_error) =
                    state.executions().finish(id, ExecutionStatus::Error, outcome)
                {
                    error!(execution_id = id, error = %store_error, "Failed to close execution");
                }
            }
            return Err(e.into());
        }
    };

    JOBS_ENQUEUED_TOTAL.with_label_values(&[SCRIPT_QUEUE]).inc();
    info!(job_id = %handle.id, session_id = %session_id, execution_id, "Script job enqueued");

    Ok(Json(ExecuteResponse {
        session_id,
        job_id: handle.id,
        status: "enqueued",
        message: ENQUEUED_MESSAGE,
    }))
}
