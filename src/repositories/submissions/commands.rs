use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Submission;

pub(crate) struct UpsertSubmission<'a> {
    pub(crate) id: &'a str,
    pub(crate) course_id: &'a str,
    pub(crate) assignment_id: &'a str,
    pub(crate) problem_id: &'a str,
    pub(crate) student_id: &'a str,
    pub(crate) answer_text: &'a str,
    pub(crate) now: PrimitiveDateTime,
}

/// One submission per (assignment, problem, student). A resubmission
/// rewrites the answer and timestamp; grading columns are untouched, so
/// `graded` never reverts.
pub(crate) async fn upsert(
    pool: &PgPool,
    params: UpsertSubmission<'_>,
) -> Result<Submission, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "INSERT INTO submissions (
             id, course_id, assignment_id, problem_id, student_id, answer_text,
             submitted_at, graded, applied_rubric_item_ids, self_graded,
             self_assessed_rubric_item_ids, created_at, updated_at
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, '[]', FALSE, '[]', $7, $7)
         ON CONFLICT (assignment_id, problem_id, student_id) DO UPDATE
         SET answer_text = EXCLUDED.answer_text,
             submitted_at = EXCLUDED.submitted_at,
             updated_at = EXCLUDED.updated_at
         RETURNING id, course_id, assignment_id, problem_id, student_id, answer_text,
                   submitted_at, graded, graded_by, graded_at, applied_rubric_item_ids,
                   feedback, self_graded, self_assessed_rubric_item_ids, created_at, updated_at",
    )
    .bind(params.id)
    .bind(params.course_id)
    .bind(params.assignment_id)
    .bind(params.problem_id)
    .bind(params.student_id)
    .bind(params.answer_text)
    .bind(params.now)
    .fetch_one(pool)
    .await
}

/// Idempotent authoritative-grade write; last write wins for both the
/// scorer path and the manual path.
pub(crate) async fn upsert_grading(
    pool: &PgPool,
    submission_id: &str,
    applied_rubric_item_ids: &[String],
    feedback: Option<&str>,
    graded_by: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE submissions
         SET graded = TRUE,
             graded_by = $1,
             graded_at = $2,
             applied_rubric_item_ids = $3,
             feedback = $4,
             updated_at = $2
         WHERE id = $5",
    )
    .bind(graded_by)
    .bind(now)
    .bind(Json(applied_rubric_item_ids))
    .bind(feedback)
    .bind(submission_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn set_self_assessment(
    pool: &PgPool,
    submission_id: &str,
    rubric_item_ids: &[String],
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE submissions
         SET self_graded = TRUE,
             self_assessed_rubric_item_ids = $1,
             updated_at = $2
         WHERE id = $3",
    )
    .bind(Json(rubric_item_ids))
    .bind(now)
    .bind(submission_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
