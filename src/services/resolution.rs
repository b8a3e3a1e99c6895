use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::core::time::primitive_now_utc;
use crate::db::models::{DiscrepancyItem, DiscrepancyReport};
use crate::repositories;
use crate::services::reconciliation::{self, DiscrepancyError};

pub(crate) struct ResolveDiscrepancy<'a> {
    pub(crate) submission_id: &'a str,
    pub(crate) rubric_item_id: &'a str,
    pub(crate) should_be_applied: bool,
    pub(crate) explanation: &'a str,
    pub(crate) resolved_by: &'a str,
}

/// Pending -> Resolved, terminal. The first resolution wins; a second
/// attempt is rejected without touching the stored decision.
pub(crate) fn apply_resolution(
    item: &mut DiscrepancyItem,
    should_be_applied: bool,
    explanation: &str,
    resolved_by: &str,
    now: PrimitiveDateTime,
) -> Result<(), DiscrepancyError> {
    if item.is_resolved() {
        return Err(DiscrepancyError::AlreadyResolved(item.rubric_item_id.clone()));
    }

    item.resolution_should_be_applied = Some(should_be_applied);
    item.resolution_explanation = Some(explanation.to_string());
    item.resolved_by = Some(resolved_by.to_string());
    item.resolved_at = Some(now);
    item.updated_at = now;

    Ok(())
}

/// Set semantics for the authoritative applied-items list; re-applying the
/// same decision cannot double-toggle. Returns whether the set changed.
pub(crate) fn toggle_applied(
    applied: &mut Vec<String>,
    rubric_item_id: &str,
    should_be_applied: bool,
) -> bool {
    let present = applied.iter().any(|id| id == rubric_item_id);
    match (present, should_be_applied) {
        (false, true) => {
            applied.push(rubric_item_id.to_string());
            true
        }
        (true, false) => {
            applied.retain(|id| id != rubric_item_id);
            true
        }
        _ => false,
    }
}

/// Resolves one filed discrepancy. The resolution write, the applied-items
/// toggle, and the report status recompute happen in a single transaction,
/// so a reader can never observe a resolved report with a stale applied
/// set.
pub(crate) async fn resolve(
    pool: &PgPool,
    params: ResolveDiscrepancy<'_>,
) -> Result<(DiscrepancyReport, Vec<DiscrepancyItem>), DiscrepancyError> {
    if params.explanation.trim().is_empty() {
        return Err(DiscrepancyError::Invalid("explanation must not be empty".to_string()));
    }
    if params.resolved_by.trim().is_empty() {
        return Err(DiscrepancyError::Invalid("resolved_by must not be empty".to_string()));
    }

    let now = primitive_now_utc();
    let mut tx = pool.begin().await?;

    let report = sqlx::query_as::<_, DiscrepancyReport>(
        "SELECT id, submission_id, student_id, course_id, assignment_id, problem_id, status,
                created_at, updated_at
         FROM discrepancy_reports WHERE submission_id = $1 FOR UPDATE",
    )
    .bind(params.submission_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| DiscrepancyError::ItemNotFound(params.rubric_item_id.to_string()))?;

    let mut item = sqlx::query_as::<_, DiscrepancyItem>(
        "SELECT id, report_id, rubric_item_id, was_applied, student_thinks_should_be_applied,
                student_explanation, resolution_should_be_applied, resolution_explanation,
                resolved_by, resolved_at, created_at, updated_at
         FROM discrepancy_items WHERE report_id = $1 AND rubric_item_id = $2 FOR UPDATE",
    )
    .bind(&report.id)
    .bind(params.rubric_item_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| DiscrepancyError::ItemNotFound(params.rubric_item_id.to_string()))?;

    apply_resolution(
        &mut item,
        params.should_be_applied,
        params.explanation,
        params.resolved_by,
        now,
    )?;

    sqlx::query(
        "UPDATE discrepancy_items
         SET resolution_should_be_applied = $1,
             resolution_explanation = $2,
             resolved_by = $3,
             resolved_at = $4,
             updated_at = $4
         WHERE id = $5",
    )
    .bind(item.resolution_should_be_applied)
    .bind(&item.resolution_explanation)
    .bind(&item.resolved_by)
    .bind(item.resolved_at)
    .bind(&item.id)
    .execute(&mut *tx)
    .await?;

    // The only path by which a resolution changes the authoritative grade.
    let applied: Json<Vec<String>> = sqlx::query_scalar(
        "SELECT applied_rubric_item_ids FROM submissions WHERE id = $1 FOR UPDATE",
    )
    .bind(params.submission_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DiscrepancyError::SubmissionNotFound)?;

    let mut applied = applied.0;
    if toggle_applied(&mut applied, params.rubric_item_id, params.should_be_applied) {
        sqlx::query(
            "UPDATE submissions SET applied_rubric_item_ids = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(Json(&applied))
        .bind(now)
        .bind(params.submission_id)
        .execute(&mut *tx)
        .await?;
    }

    let items = sqlx::query_as::<_, DiscrepancyItem>(
        "SELECT id, report_id, rubric_item_id, was_applied, student_thinks_should_be_applied,
                student_explanation, resolution_should_be_applied, resolution_explanation,
                resolved_by, resolved_at, created_at, updated_at
         FROM discrepancy_items WHERE report_id = $1
         ORDER BY created_at",
    )
    .bind(&report.id)
    .fetch_all(&mut *tx)
    .await?;

    let status = reconciliation::report_status(&items);

    sqlx::query("UPDATE discrepancy_reports SET status = $1, updated_at = $2 WHERE id = $3")
        .bind(status)
        .bind(now)
        .bind(&report.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    metrics::counter!("discrepancies_resolved_total").increment(1);
    tracing::info!(
        submission_id = %params.submission_id,
        rubric_item_id = %params.rubric_item_id,
        should_be_applied = params.should_be_applied,
        resolved_by = %params.resolved_by,
        "Discrepancy resolved"
    );

    repositories::discrepancies::find_report_by_submission(pool, params.submission_id)
        .await?
        .ok_or_else(|| DiscrepancyError::ItemNotFound(params.rubric_item_id.to_string()))
        .map(|report| (report, items))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_item() -> DiscrepancyItem {
        let now = primitive_now_utc();
        DiscrepancyItem {
            id: "item-1".to_string(),
            report_id: "report-1".to_string(),
            rubric_item_id: "ri-1".to_string(),
            was_applied: false,
            student_thinks_should_be_applied: true,
            student_explanation: "I derived the formula".to_string(),
            resolution_should_be_applied: None,
            resolution_explanation: None,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn resolution_is_recorded_once() {
        let mut item = pending_item();
        let now = primitive_now_utc();

        apply_resolution(&mut item, true, "student is right", "teacher-1", now)
            .expect("first resolution");

        assert_eq!(item.resolution_should_be_applied, Some(true));
        assert_eq!(item.resolved_by.as_deref(), Some("teacher-1"));
        assert!(item.is_resolved());
    }

    #[test]
    fn second_resolution_is_rejected_and_first_kept() {
        let mut item = pending_item();
        let now = primitive_now_utc();

        apply_resolution(&mut item, true, "student is right", "teacher-1", now)
            .expect("first resolution");

        let err = apply_resolution(&mut item, false, "changed my mind", "teacher-2", now)
            .unwrap_err();

        assert!(matches!(err, DiscrepancyError::AlreadyResolved(_)));
        assert_eq!(item.resolution_should_be_applied, Some(true));
        assert_eq!(item.resolution_explanation.as_deref(), Some("student is right"));
        assert_eq!(item.resolved_by.as_deref(), Some("teacher-1"));
    }

    #[test]
    fn toggle_applied_adds_and_removes() {
        let mut applied = vec!["ri-1".to_string()];

        assert!(toggle_applied(&mut applied, "ri-2", true));
        assert_eq!(applied, vec!["ri-1".to_string(), "ri-2".to_string()]);

        assert!(toggle_applied(&mut applied, "ri-1", false));
        assert_eq!(applied, vec!["ri-2".to_string()]);
    }

    #[test]
    fn toggle_applied_is_idempotent() {
        let mut applied = vec!["ri-1".to_string()];

        assert!(!toggle_applied(&mut applied, "ri-1", true));
        assert_eq!(applied, vec!["ri-1".to_string()]);

        assert!(!toggle_applied(&mut applied, "ri-9", false));
        assert_eq!(applied, vec!["ri-1".to_string()]);
    }
}
