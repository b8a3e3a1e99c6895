use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::validation::{validate_body, validate_rubric_points};
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::Problem;
use crate::repositories;
use crate::schemas::problem::{
    ProblemCreateRequest, ProblemResponse, RubricItemPayload, RubricItemResponse,
};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_problem))
        .route("/:problem_id", get(get_problem))
        .route(
            "/:problem_id/rubric-items/:rubric_item_id",
            put(upsert_rubric_item).delete(delete_rubric_item),
        )
        .route("/:problem_id/finalize", post(finalize_rubric))
}

async fn create_problem(
    State(state): State<AppState>,
    Json(body): Json<ProblemCreateRequest>,
) -> Result<(StatusCode, Json<ProblemResponse>), ApiError> {
    validate_body(&body)?;
    for item in &body.rubric {
        validate_rubric_points(item.points)?;
    }

    let now = primitive_now_utc();
    let problem = repositories::problems::create(
        state.db(),
        repositories::problems::CreateProblem {
            id: &Uuid::new_v4().to_string(),
            question: &body.question,
            reference_solution: &body.reference_solution,
            created_at: now,
        },
    )
    .await
    .map_err(|err| ApiError::internal(err, "Failed to create problem"))?;

    for item in &body.rubric {
        repositories::problems::upsert_rubric_item(
            state.db(),
            repositories::problems::UpsertRubricItem {
                id: &Uuid::new_v4().to_string(),
                problem_id: &problem.id,
                description: &item.description,
                points: item.points,
                now,
            },
        )
        .await
        .map_err(|err| ApiError::internal(err, "Failed to create rubric item"))?
        .ok_or_else(|| ApiError::Internal("Failed to create rubric item".to_string()))?;
    }

    let rubric = repositories::problems::list_rubric_items(state.db(), &problem.id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to fetch rubric"))?;

    Ok((StatusCode::CREATED, Json(ProblemResponse::from_parts(problem, rubric))))
}

async fn get_problem(
    Path(problem_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ProblemResponse>, ApiError> {
    let problem = fetch_problem(&state, &problem_id).await?;

    let rubric = repositories::problems::list_rubric_items(state.db(), &problem.id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to fetch rubric"))?;

    Ok(Json(ProblemResponse::from_parts(problem, rubric)))
}

async fn upsert_rubric_item(
    Path((problem_id, rubric_item_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(body): Json<RubricItemPayload>,
) -> Result<Json<RubricItemResponse>, ApiError> {
    validate_body(&body)?;
    validate_rubric_points(body.points)?;

    let problem = fetch_problem(&state, &problem_id).await?;
    ensure_rubric_editable(&problem)?;

    let item = repositories::problems::upsert_rubric_item(
        state.db(),
        repositories::problems::UpsertRubricItem {
            id: &rubric_item_id,
            problem_id: &problem.id,
            description: &body.description,
            points: body.points,
            now: primitive_now_utc(),
        },
    )
    .await
    .map_err(|err| ApiError::internal(err, "Failed to upsert rubric item"))?
    .ok_or_else(|| {
        ApiError::BadRequest("Rubric item id belongs to another problem".to_string())
    })?;

    Ok(Json(RubricItemResponse {
        id: item.id,
        description: item.description,
        points: item.points,
    }))
}

async fn delete_rubric_item(
    Path((problem_id, rubric_item_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let problem = fetch_problem(&state, &problem_id).await?;
    ensure_rubric_editable(&problem)?;

    let deleted =
        repositories::problems::delete_rubric_item(state.db(), &problem.id, &rubric_item_id)
            .await
            .map_err(|err| ApiError::internal(err, "Failed to delete rubric item"))?;

    if !deleted {
        return Err(ApiError::NotFound("Rubric item not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn finalize_rubric(
    Path(problem_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ProblemResponse>, ApiError> {
    let problem = fetch_problem(&state, &problem_id).await?;
    ensure_rubric_editable(&problem)?;

    repositories::problems::finalize(state.db(), &problem.id, primitive_now_utc())
        .await
        .map_err(|err| ApiError::internal(err, "Failed to finalize rubric"))?;

    let problem = fetch_problem(&state, &problem_id).await?;
    let rubric = repositories::problems::list_rubric_items(state.db(), &problem.id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to fetch rubric"))?;

    Ok(Json(ProblemResponse::from_parts(problem, rubric)))
}

async fn fetch_problem(state: &AppState, problem_id: &str) -> Result<Problem, ApiError> {
    repositories::problems::find_by_id(state.db(), problem_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to fetch problem"))?
        .ok_or_else(|| ApiError::NotFound("Problem not found".to_string()))
}

fn ensure_rubric_editable(problem: &Problem) -> Result<(), ApiError> {
    if problem.rubric_finalized {
        return Err(ApiError::Conflict("Rubric is finalized".to_string()));
    }
    Ok(())
}
