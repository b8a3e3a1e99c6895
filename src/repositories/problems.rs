use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{Problem, RubricItem};

pub(crate) struct CreateProblem<'a> {
    pub(crate) id: &'a str,
    pub(crate) question: &'a str,
    pub(crate) reference_solution: &'a str,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) struct UpsertRubricItem<'a> {
    pub(crate) id: &'a str,
    pub(crate) problem_id: &'a str,
    pub(crate) description: &'a str,
    pub(crate) points: f64,
    pub(crate) now: PrimitiveDateTime,
}

pub(crate) async fn create(
    pool: &PgPool,
    params: CreateProblem<'_>,
) -> Result<Problem, sqlx::Error> {
    sqlx::query_as::<_, Problem>(
        "INSERT INTO problems (id, question, reference_solution, rubric_finalized, created_at, updated_at)
         VALUES ($1, $2, $3, FALSE, $4, $4)
         RETURNING id, question, reference_solution, rubric_finalized, created_at, updated_at",
    )
    .bind(params.id)
    .bind(params.question)
    .bind(params.reference_solution)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    problem_id: &str,
) -> Result<Option<Problem>, sqlx::Error> {
    sqlx::query_as::<_, Problem>(
        "SELECT id, question, reference_solution, rubric_finalized, created_at, updated_at
         FROM problems WHERE id = $1",
    )
    .bind(problem_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_rubric_items(
    pool: &PgPool,
    problem_id: &str,
) -> Result<Vec<RubricItem>, sqlx::Error> {
    sqlx::query_as::<_, RubricItem>(
        "SELECT id, problem_id, description, points, order_index, created_at, updated_at
         FROM rubric_items WHERE problem_id = $1
         ORDER BY order_index",
    )
    .bind(problem_id)
    .fetch_all(pool)
    .await
}

/// Replace-by-id semantics: an existing item keeps its position in the
/// rubric, a new one is appended. Returns `None` when the id already
/// belongs to a different problem's rubric.
pub(crate) async fn upsert_rubric_item(
    pool: &PgPool,
    params: UpsertRubricItem<'_>,
) -> Result<Option<RubricItem>, sqlx::Error> {
    sqlx::query_as::<_, RubricItem>(
        "INSERT INTO rubric_items (id, problem_id, description, points, order_index, created_at, updated_at)
         VALUES (
             $1, $2, $3, $4,
             COALESCE((SELECT MAX(order_index) + 1 FROM rubric_items WHERE problem_id = $2), 0),
             $5, $5
         )
         ON CONFLICT (id) DO UPDATE
         SET description = EXCLUDED.description,
             points = EXCLUDED.points,
             updated_at = EXCLUDED.updated_at
         WHERE rubric_items.problem_id = EXCLUDED.problem_id
         RETURNING id, problem_id, description, points, order_index, created_at, updated_at",
    )
    .bind(params.id)
    .bind(params.problem_id)
    .bind(params.description)
    .bind(params.points)
    .bind(params.now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn delete_rubric_item(
    pool: &PgPool,
    problem_id: &str,
    rubric_item_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM rubric_items WHERE problem_id = $1 AND id = $2")
        .bind(problem_id)
        .bind(rubric_item_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn finalize(
    pool: &PgPool,
    problem_id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE problems SET rubric_finalized = TRUE, updated_at = $1
         WHERE id = $2 AND rubric_finalized = FALSE",
    )
    .bind(now)
    .bind(problem_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
