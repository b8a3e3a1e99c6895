use sqlx::PgPool;

use crate::db::models::{DiscrepancyItem, DiscrepancyReport};

const REPORT_COLUMNS: &str =
    "id, submission_id, student_id, course_id, assignment_id, problem_id, status,
     created_at, updated_at";

const ITEM_COLUMNS: &str =
    "id, report_id, rubric_item_id, was_applied, student_thinks_should_be_applied,
     student_explanation, resolution_should_be_applied, resolution_explanation,
     resolved_by, resolved_at, created_at, updated_at";

pub(crate) async fn find_report_by_submission(
    pool: &PgPool,
    submission_id: &str,
) -> Result<Option<DiscrepancyReport>, sqlx::Error> {
    sqlx::query_as::<_, DiscrepancyReport>(&format!(
        "SELECT {REPORT_COLUMNS} FROM discrepancy_reports WHERE submission_id = $1"
    ))
    .bind(submission_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_items(
    pool: &PgPool,
    report_id: &str,
) -> Result<Vec<DiscrepancyItem>, sqlx::Error> {
    sqlx::query_as::<_, DiscrepancyItem>(&format!(
        "SELECT {ITEM_COLUMNS} FROM discrepancy_items WHERE report_id = $1
         ORDER BY created_at"
    ))
    .bind(report_id)
    .fetch_all(pool)
    .await
}
