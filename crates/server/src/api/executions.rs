//! Execution history handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use scriptrelay_core::{Execution, ExecutionFilter, ExecutionStatus};

use super::{middleware::RequireUser, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for list queries
pub const MAX_LIMIT: i64 = 1000;

/// Default limit for list queries
pub const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for listing executions
#[derive(Debug, Deserialize)]
pub struct ListExecutionsParams {
    pub script_id: Option<i64>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionResponse {
    pub id: i64,
    pub script_id: Option<i64>,
    pub status: ExecutionStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub request_args: Value,
    pub response_data: Option<Value>,
    pub logs: String,
    pub screenshot_url: Option<String>,
    /// Seconds between start and finish, null while running.
    pub duration: Option<f64>,
}

impl From<Execution> for ExecutionResponse {
    fn from(execution: Execution) -> Self {
        Self {
            duration: execution.duration_secs(),
            id: execution.id,
            script_id: execution.script_id,
            status: execution.status,
            started_at: execution.started_at.to_rfc3339(),
            finished_at: execution.finished_at.map(|t| t.to_rfc3339()),
            request_args: execution.request_args,
            response_data: execution.response_data,
            logs: execution.logs,
            screenshot_url: execution.screenshot_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListExecutionsResponse {
    pub executions: Vec<ExecutionResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Clamp paging parameters to sane bounds.
pub fn paging(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        offset.unwrap_or(0).max(0),
    )
}

/// Build the owner-scoped filter shared by the execution list routes.
pub fn build_filter(
    owner: &str,
    script_id: Option<i64>,
    params: &ListExecutionsParams,
) -> Result<ExecutionFilter, ApiError> {
    let (limit, offset) = paging(params.limit, params.offset);
    let mut filter = ExecutionFilter::new()
        .with_owner(owner)
        .with_limit(limit)
        .with_offset(offset);

    if let Some(script_id) = script_id.or(params.script_id) {
        filter = filter.with_script_id(script_id);
    }
    if let Some(status) = &params.status {
        let status = status
            .parse::<ExecutionStatus>()
            .map_err(ApiError::Validation)?;
        filter = filter.with_status(status);
    }
    Ok(filter)
}

/// Run a filtered listing.
pub fn list_with_filter(
    state: &AppState,
    filter: &ExecutionFilter,
) -> Result<ListExecutionsResponse, ApiError> {
    let executions = state.executions().list(filter)?;
    let total = state.executions().count(filter)?;

    Ok(ListExecutionsResponse {
        executions: executions.into_iter().map(ExecutionResponse::from).collect(),
        total,
        limit: filter.limit,
        offset: filter.offset,
    })
}

/// List the caller's executions, newest first.
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Query(params): Query<ListExecutionsParams>,
) -> Result<Json<ListExecutionsResponse>, ApiError> {
    let filter = build_filter(&user_id, None, &params)?;
    Ok(Json(list_with_filter(&state, &filter)?))
}

/// Get one of the caller's executions.
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Path(id): Path<i64>,
) -> Result<Json<ExecutionResponse>, ApiError> {
    let not_found = || ApiError::NotFound(format!("Execution not found: {}", id));

    let execution = state.executions().get(id)?.ok_or_else(not_found)?;
    let script_id = execution.script_id.ok_or_else(not_found)?;
    state
        .scripts()
        .get_owned(script_id, &user_id)?
        .ok_or_else(not_found)?;

    Ok(Json(ExecutionResponse::from(execution)))
}
