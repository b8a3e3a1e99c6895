use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::validation::validate_body;
use crate::core::state::AppState;
use crate::schemas::discrepancy::{
    DiscrepancyReportResponse, FileDiscrepancyRequest, ResolveDiscrepancyRequest,
};
use crate::services::{reconciliation, resolution};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:submission_id/discrepancies", post(file_discrepancy))
        .route(
            "/:submission_id/discrepancies/:rubric_item_id/resolve",
            post(resolve_discrepancy),
        )
        .route("/:submission_id/discrepancy-report", get(get_report))
}

async fn file_discrepancy(
    Path(submission_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<FileDiscrepancyRequest>,
) -> Result<(StatusCode, Json<DiscrepancyReportResponse>), ApiError> {
    validate_body(&body)?;

    let (report, items) = reconciliation::file_discrepancy(
        state.db(),
        reconciliation::FileDiscrepancy {
            submission_id: &submission_id,
            rubric_item_id: &body.rubric_item_id,
            student_thinks_should_be_applied: body.student_thinks_should_be_applied,
            explanation: &body.explanation,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(DiscrepancyReportResponse::from_parts(report, items))))
}

async fn resolve_discrepancy(
    Path((submission_id, rubric_item_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(body): Json<ResolveDiscrepancyRequest>,
) -> Result<Json<DiscrepancyReportResponse>, ApiError> {
    validate_body(&body)?;

    let (report, items) = resolution::resolve(
        state.db(),
        resolution::ResolveDiscrepancy {
            submission_id: &submission_id,
            rubric_item_id: &rubric_item_id,
            should_be_applied: body.should_be_applied,
            explanation: &body.explanation,
            resolved_by: &body.resolved_by,
        },
    )
    .await?;

    Ok(Json(DiscrepancyReportResponse::from_parts(report, items)))
}

async fn get_report(
    Path(submission_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<DiscrepancyReportResponse>, ApiError> {
    let (report, items) = reconciliation::load_report(state.db(), &submission_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Discrepancy report not found".to_string()))?;

    Ok(Json(DiscrepancyReportResponse::from_parts(report, items)))
}
