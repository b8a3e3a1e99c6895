use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::Submission;
use crate::services::reconciliation::RubricItemAgreement;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SubmissionUpsertRequest {
    #[validate(length(min = 1, message = "course_id must not be empty"))]
    pub(crate) course_id: String,
    #[validate(length(min = 1, message = "assignment_id must not be empty"))]
    pub(crate) assignment_id: String,
    #[validate(length(min = 1, message = "problem_id must not be empty"))]
    pub(crate) problem_id: String,
    #[validate(length(min = 1, message = "student_id must not be empty"))]
    pub(crate) student_id: String,
    pub(crate) answer_text: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ManualGradeRequest {
    pub(crate) applied_rubric_item_ids: Vec<String>,
    #[serde(default)]
    pub(crate) feedback: Option<String>,
    #[validate(length(min = 1, message = "graded_by must not be empty"))]
    pub(crate) graded_by: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SelfAssessmentRequest {
    pub(crate) rubric_item_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmissionResponse {
    pub(crate) id: String,
    pub(crate) course_id: String,
    pub(crate) assignment_id: String,
    pub(crate) problem_id: String,
    pub(crate) student_id: String,
    pub(crate) answer_text: String,
    pub(crate) submitted_at: String,
    pub(crate) graded: bool,
    pub(crate) graded_by: Option<String>,
    pub(crate) graded_at: Option<String>,
    pub(crate) applied_rubric_item_ids: Vec<String>,
    pub(crate) feedback: Option<String>,
    pub(crate) self_graded: bool,
    pub(crate) self_assessed_rubric_item_ids: Vec<String>,
}

impl From<Submission> for SubmissionResponse {
    fn from(submission: Submission) -> Self {
        Self {
            id: submission.id,
            course_id: submission.course_id,
            assignment_id: submission.assignment_id,
            problem_id: submission.problem_id,
            student_id: submission.student_id,
            answer_text: submission.answer_text,
            submitted_at: format_primitive(submission.submitted_at),
            graded: submission.graded,
            graded_by: submission.graded_by,
            graded_at: submission.graded_at.map(format_primitive),
            applied_rubric_item_ids: submission.applied_rubric_item_ids.0,
            feedback: submission.feedback,
            self_graded: submission.self_graded,
            self_assessed_rubric_item_ids: submission.self_assessed_rubric_item_ids.0,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ReconciliationResponse {
    pub(crate) submission_id: String,
    pub(crate) items: Vec<RubricItemAgreement>,
    pub(crate) disputed_count: usize,
}

impl ReconciliationResponse {
    pub(crate) fn new(submission_id: String, items: Vec<RubricItemAgreement>) -> Self {
        let disputed_count = items.iter().filter(|item| item.disputed).count();
        Self { submission_id, items, disputed_count }
    }
}
