//! Saved script handlers. Every route is scoped to the authenticated caller.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use scriptrelay_core::{CreateScriptRequest, ExecutionFilter, Script, UpdateScriptRequest};

use super::executions::{
    build_filter, list_with_filter, paging, ExecutionResponse, ListExecutionsParams,
    ListExecutionsResponse,
};
use super::{middleware::RequireUser, ApiError};
use crate::state::AppState;

const MAX_NAME_CHARS: usize = 255;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateScriptBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateScriptBody {
    pub name: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListScriptsParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ScriptResponse {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub created_at: String,
    pub updated_at: String,
    pub last_executed_at: Option<String>,
}

impl From<Script> for ScriptResponse {
    fn from(script: Script) -> Self {
        Self {
            id: script.id,
            name: script.name,
            code: script.code,
            created_at: script.created_at.to_rfc3339(),
            updated_at: script.updated_at.to_rfc3339(),
            last_executed_at: script.last_executed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListScriptsResponse {
    pub scripts: Vec<ScriptResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

fn check_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ApiError::Validation(format!(
            "name is too long (max {} characters)",
            MAX_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

fn check_code(code: &str) -> Result<String, ApiError> {
    if code.trim().is_empty() {
        return Err(ApiError::Validation("code is required".to_string()));
    }
    Ok(code.to_string())
}

fn script_not_found(id: i64) -> ApiError {
    ApiError::NotFound(format!("Script not found: {}", id))
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_script(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    body: Result<Json<CreateScriptBody>, JsonRejection>,
) -> Result<(StatusCode, Json<ScriptResponse>), ApiError> {
    let Json(body) = body.map_err(|e| ApiError::Validation(e.body_text()))?;

    let script = state.scripts().create(CreateScriptRequest {
        owner: user_id,
        name: check_name(&body.name)?,
        code: check_code(&body.code)?,
    })?;
    info!(script_id = script.id, owner = %script.owner, "Script saved");

    Ok((StatusCode::CREATED, Json(ScriptResponse::from(script))))
}

pub async fn list_scripts(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Query(params): Query<ListScriptsParams>,
) -> Result<Json<ListScriptsResponse>, ApiError> {
    let (limit, offset) = paging(params.limit, params.offset);
    let scripts = state.scripts().list(&user_id, limit, offset)?;
    let total = state.scripts().count(&user_id)?;

    Ok(Json(ListScriptsResponse {
        scripts: scripts.into_iter().map(ScriptResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

pub async fn get_script(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Path(id): Path<i64>,
) -> Result<Json<ScriptResponse>, ApiError> {
    let script = state
        .scripts()
        .get_owned(id, &user_id)?
        .ok_or_else(|| script_not_found(id))?;
    Ok(Json(ScriptResponse::from(script)))
}

pub async fn update_script(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Path(id): Path<i64>,
    body: Result<Json<UpdateScriptBody>, JsonRejection>,
) -> Result<Json<ScriptResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::Validation(e.body_text()))?;

    let request = UpdateScriptRequest {
        name: body.name.as_deref().map(check_name).transpose()?,
        code: body.code.as_deref().map(check_code).transpose()?,
    };
    let script = state.scripts().update(id, &user_id, request)?;
    Ok(Json(ScriptResponse::from(script)))
}

pub async fn delete_script(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let script = state.scripts().delete(id, &user_id)?;
    info!(script_id = script.id, owner = %script.owner, "Script deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Executions of one owned script, newest first.
pub async fn list_script_executions(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Path(id): Path<i64>,
    Query(params): Query<ListExecutionsParams>,
) -> Result<Json<ListExecutionsResponse>, ApiError> {
    state
        .scripts()
        .get_owned(id, &user_id)?
        .ok_or_else(|| script_not_found(id))?;

    let filter = build_filter(&user_id, Some(id), &params)?;
    Ok(Json(list_with_filter(&state, &filter)?))
}

/// Most recent execution of one owned script; 404 when it never ran.
pub async fn latest_script_execution(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Path(id): Path<i64>,
) -> Result<Json<ExecutionResponse>, ApiError> {
    state
        .scripts()
        .get_owned(id, &user_id)?
        .ok_or_else(|| script_not_found(id))?;

    let filter = ExecutionFilter::new()
        .with_owner(user_id)
        .with_script_id(id)
        .with_limit(1);
    let latest = state
        .executions()
        .list(&filter)?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::NotFound(format!("Script {} has no executions", id)))?;

    Ok(Json(ExecutionResponse::from(latest)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_name_trims() {
        assert_eq!(check_name("  title  ").unwrap(), "title");
        assert!(check_name("   ").is_err());
        assert!(check_name(&"x".repeat(MAX_NAME_CHARS + 1)).is_err());
    }

    #[test]
    fn test_check_code_keeps_whitespace() {
        assert_eq!(check_code("  end\n").unwrap(), "  end\n");
        assert!(check_code("\n\t").is_err());
    }
}
