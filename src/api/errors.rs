use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::reconciliation::DiscrepancyError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
    }
}

impl From<DiscrepancyError> for ApiError {
    fn from(err: DiscrepancyError) -> Self {
        match err {
            DiscrepancyError::SubmissionNotFound => {
                ApiError::NotFound("Submission not found".to_string())
            }
            DiscrepancyError::ItemNotFound(id) => {
                ApiError::NotFound(format!("No discrepancy filed for rubric item {id}"))
            }
            DiscrepancyError::UnknownRubricItem(id) => ApiError::BadRequest(format!(
                "Rubric item {id} does not belong to the submission's problem"
            )),
            DiscrepancyError::AlreadyResolved(id) => {
                ApiError::Conflict(format!("Discrepancy for rubric item {id} is already resolved"))
            }
            DiscrepancyError::Invalid(message) => ApiError::BadRequest(message),
            DiscrepancyError::Db(err) => ApiError::internal(err, "Database error"),
        }
    }
}
