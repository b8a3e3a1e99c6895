use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::ReportStatus;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Problem {
    pub(crate) id: String,
    pub(crate) question: String,
    pub(crate) reference_solution: String,
    pub(crate) rubric_finalized: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct RubricItem {
    pub(crate) id: String,
    pub(crate) problem_id: String,
    pub(crate) description: String,
    pub(crate) points: f64,
    pub(crate) order_index: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Submission {
    pub(crate) id: String,
    pub(crate) course_id: String,
    pub(crate) assignment_id: String,
    pub(crate) problem_id: String,
    pub(crate) student_id: String,
    pub(crate) answer_text: String,
    pub(crate) submitted_at: PrimitiveDateTime,
    pub(crate) graded: bool,
    pub(crate) graded_by: Option<String>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) applied_rubric_item_ids: Json<Vec<String>>,
    pub(crate) feedback: Option<String>,
    pub(crate) self_graded: bool,
    pub(crate) self_assessed_rubric_item_ids: Json<Vec<String>>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl Submission {
    pub(crate) fn has_applied(&self, rubric_item_id: &str) -> bool {
        self.applied_rubric_item_ids.0.iter().any(|id| id == rubric_item_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct DiscrepancyReport {
    pub(crate) id: String,
    pub(crate) submission_id: String,
    pub(crate) student_id: String,
    pub(crate) course_id: String,
    pub(crate) assignment_id: String,
    pub(crate) problem_id: String,
    pub(crate) status: ReportStatus,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct DiscrepancyItem {
    pub(crate) id: String,
    pub(crate) report_id: String,
    pub(crate) rubric_item_id: String,
    pub(crate) was_applied: bool,
    pub(crate) student_thinks_should_be_applied: bool,
    pub(crate) student_explanation: String,
    pub(crate) resolution_should_be_applied: Option<bool>,
    pub(crate) resolution_explanation: Option<String>,
    pub(crate) resolved_by: Option<String>,
    pub(crate) resolved_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl DiscrepancyItem {
    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
