use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::validation::validate_body;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{RubricItem, Submission};
use crate::repositories;
use crate::schemas::submission::{
    ManualGradeRequest, ReconciliationResponse, SelfAssessmentRequest, SubmissionResponse,
    SubmissionUpsertRequest,
};
use crate::services::reconciliation;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upsert_submission))
        .route("/:submission_id", get(get_submission))
        .route("/:submission_id/grade", post(grade_submission))
        .route("/:submission_id/self-assessment", put(put_self_assessment))
        .route("/:submission_id/reconciliation", get(get_reconciliation))
}

async fn upsert_submission(
    State(state): State<AppState>,
    Json(body): Json<SubmissionUpsertRequest>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    validate_body(&body)?;

    repositories::problems::find_by_id(state.db(), &body.problem_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to fetch problem"))?
        .ok_or_else(|| ApiError::BadRequest("Unknown problem".to_string()))?;

    let submission = repositories::submissions::upsert(
        state.db(),
        repositories::submissions::UpsertSubmission {
            id: &Uuid::new_v4().to_string(),
            course_id: &body.course_id,
            assignment_id: &body.assignment_id,
            problem_id: &body.problem_id,
            student_id: &body.student_id,
            answer_text: &body.answer_text,
            now: primitive_now_utc(),
        },
    )
    .await
    .map_err(|err| ApiError::internal(err, "Failed to upsert submission"))?;

    Ok(Json(SubmissionResponse::from(submission)))
}

async fn get_submission(
    Path(submission_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let submission = fetch_submission(&state, &submission_id).await?;
    Ok(Json(SubmissionResponse::from(submission)))
}

/// Manual authoritative grading; the other path is the bulk scorer run.
async fn grade_submission(
    Path(submission_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<ManualGradeRequest>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    validate_body(&body)?;

    let submission = fetch_submission(&state, &submission_id).await?;
    let rubric = fetch_rubric(&state, &submission.problem_id).await?;
    ensure_known_rubric_items(&rubric, &body.applied_rubric_item_ids)?;

    repositories::submissions::upsert_grading(
        state.db(),
        &submission.id,
        &body.applied_rubric_item_ids,
        body.feedback.as_deref(),
        &body.graded_by,
        primitive_now_utc(),
    )
    .await
    .map_err(|err| ApiError::internal(err, "Failed to write grading"))?;

    let submission = fetch_submission(&state, &submission_id).await?;
    Ok(Json(SubmissionResponse::from(submission)))
}

async fn put_self_assessment(
    Path(submission_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<SelfAssessmentRequest>,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    let submission = fetch_submission(&state, &submission_id).await?;
    let rubric = fetch_rubric(&state, &submission.problem_id).await?;
    ensure_known_rubric_items(&rubric, &body.rubric_item_ids)?;

    repositories::submissions::set_self_assessment(
        state.db(),
        &submission.id,
        &body.rubric_item_ids,
        primitive_now_utc(),
    )
    .await
    .map_err(|err| ApiError::internal(err, "Failed to store self-assessment"))?;

    let items = reconciliation::classify(
        &rubric,
        &submission.applied_rubric_item_ids.0,
        &body.rubric_item_ids,
    );

    Ok(Json(ReconciliationResponse::new(submission.id, items)))
}

async fn get_reconciliation(
    Path(submission_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    let submission = fetch_submission(&state, &submission_id).await?;

    if !submission.graded {
        return Err(ApiError::Conflict("Submission has not been graded yet".to_string()));
    }
    if !submission.self_graded {
        return Err(ApiError::Conflict("Submission has no self-assessment".to_string()));
    }

    let rubric = fetch_rubric(&state, &submission.problem_id).await?;
    let items = reconciliation::classify(
        &rubric,
        &submission.applied_rubric_item_ids.0,
        &submission.self_assessed_rubric_item_ids.0,
    );

    Ok(Json(ReconciliationResponse::new(submission.id, items)))
}

async fn fetch_submission(state: &AppState, submission_id: &str) -> Result<Submission, ApiError> {
    repositories::submissions::find_by_id(state.db(), submission_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to fetch submission"))?
        .ok_or_else(|| ApiError::NotFound("Submission not found".to_string()))
}

async fn fetch_rubric(state: &AppState, problem_id: &str) -> Result<Vec<RubricItem>, ApiError> {
    repositories::problems::list_rubric_items(state.db(), problem_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to fetch rubric"))
}

fn ensure_known_rubric_items(
    rubric: &[RubricItem],
    rubric_item_ids: &[String],
) -> Result<(), ApiError> {
    for id in rubric_item_ids {
        if !rubric.iter().any(|item| &item.id == id) {
            return Err(ApiError::BadRequest(format!(
                "Rubric item {id} does not belong to the submission's problem"
            )));
        }
    }
    Ok(())
}
