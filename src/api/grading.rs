use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::repositories;
use crate::schemas::grading::{
    BulkGradingRequest, BulkGradingStartResponse, GradingJobResponse,
};
use crate::services::bulk_grading::{BulkGradingParams, PgGradingStore};

const SCORER_GRADER_ID: &str = "ai-scorer";

pub(crate) fn assignments_router() -> Router<AppState> {
    Router::new()
        .route("/:assignment_id/problems/:problem_id/bulk-grading", post(start_bulk_grading))
}

pub(crate) fn jobs_router() -> Router<AppState> {
    Router::new().route("/:job_id", get(get_job)).route("/:job_id/cancel", post(cancel_job))
}

async fn start_bulk_grading(
    Path((assignment_id, problem_id)): Path<(String, String)>,
    State(state): State<AppState>,
    body: Option<Json<BulkGradingRequest>>,
) -> Result<(StatusCode, Json<BulkGradingStartResponse>), ApiError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();

    repositories::problems::find_by_id(state.db(), &problem_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to fetch problem"))?
        .ok_or_else(|| ApiError::NotFound("Problem not found".to_string()))?;

    let grading = state.settings().grading();
    let concurrency =
        body.concurrency.unwrap_or(grading.default_concurrency).clamp(1, grading.max_concurrency);

    let job_id = state.grading_jobs().start(
        Arc::new(PgGradingStore::new(state.db().clone())),
        state.scorer(),
        BulkGradingParams {
            assignment_id,
            problem_id,
            concurrency,
            graded_by: SCORER_GRADER_ID.to_string(),
        },
    );

    Ok((StatusCode::ACCEPTED, Json(BulkGradingStartResponse { job_id })))
}

async fn get_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<GradingJobResponse>, ApiError> {
    state
        .grading_jobs()
        .snapshot(&job_id)
        .map(|snapshot| Json(GradingJobResponse::from(snapshot)))
        .ok_or_else(|| ApiError::NotFound("Grading job not found".to_string()))
}

async fn cancel_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<GradingJobResponse>, ApiError> {
    state
        .grading_jobs()
        .cancel(&job_id)
        .ok_or_else(|| ApiError::NotFound("Grading job not found".to_string()))?;

    state
        .grading_jobs()
        .snapshot(&job_id)
        .map(|snapshot| Json(GradingJobResponse::from(snapshot)))
        .ok_or_else(|| ApiError::NotFound("Grading job not found".to_string()))
}
