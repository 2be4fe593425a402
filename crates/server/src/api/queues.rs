//! Queue and job status handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use scriptrelay_core::{JobStatus, QueueStats};

use super::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct QueuesResponse {
    pub queues: Vec<QueueStats>,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub job: JobStatus,
    pub run_secs: Option<f64>,
}

pub async fn list_queues(State(state): State<Arc<AppState>>) -> Json<QueuesResponse> {
    Json(QueuesResponse {
        queues: state.queue().stats(),
    })
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .queue()
        .job_status(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", id)))?;

    Ok(Json(JobStatusResponse {
        run_secs: job.run_secs(),
        job,
    }))
}
