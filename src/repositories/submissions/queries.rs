use sqlx::PgPool;

use crate::db::models::Submission;

const SUBMISSION_COLUMNS: &str =
    "id, course_id, assignment_id, problem_id, student_id, answer_text, submitted_at,
     graded, graded_by, graded_at, applied_rubric_item_ids, feedback,
     self_graded, self_assessed_rubric_item_ids, created_at, updated_at";

pub(crate) async fn find_by_id(
    pool: &PgPool,
    submission_id: &str,
) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1"
    ))
    .bind(submission_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_ungraded(
    pool: &PgPool,
    assignment_id: &str,
    problem_id: &str,
) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions
         WHERE assignment_id = $1 AND problem_id = $2 AND NOT graded
         ORDER BY submitted_at"
    ))
    .bind(assignment_id)
    .bind(problem_id)
    .fetch_all(pool)
    .await
}
