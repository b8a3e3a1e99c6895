use std::collections::BTreeSet;

use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::models::{DiscrepancyItem, DiscrepancyReport, RubricItem};
use crate::db::types::ReportStatus;
use crate::repositories;

#[derive(Debug, Error)]
pub(crate) enum DiscrepancyError {
    #[error("submission not found")]
    SubmissionNotFound,
    #[error("rubric item {0} does not belong to the submission's problem")]
    UnknownRubricItem(String),
    #[error("no discrepancy filed for rubric item {0}")]
    ItemNotFound(String),
    #[error("discrepancy for rubric item {0} is already resolved")]
    AlreadyResolved(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct RubricItemAgreement {
    pub(crate) rubric_item_id: String,
    pub(crate) authoritative: bool,
    pub(crate) self_assessed: bool,
    pub(crate) disputed: bool,
}

/// Pure and total over the rubric: every item is classified, including
/// items absent from both sets (agreeing-absent).
pub(crate) fn classify(
    rubric: &[RubricItem],
    applied: &[String],
    self_assessed: &[String],
) -> Vec<RubricItemAgreement> {
    let applied: BTreeSet<&str> = applied.iter().map(String::as_str).collect();
    let self_assessed: BTreeSet<&str> = self_assessed.iter().map(String::as_str).collect();

    rubric
        .iter()
        .map(|item| {
            let authoritative = applied.contains(item.id.as_str());
            let self_assessed = self_assessed.contains(item.id.as_str());
            RubricItemAgreement {
                rubric_item_id: item.id.clone(),
                authoritative,
                self_assessed,
                disputed: authoritative != self_assessed,
            }
        })
        .collect()
}

/// A report is resolved exactly when every filed item carries a resolution.
pub(crate) fn report_status(items: &[DiscrepancyItem]) -> ReportStatus {
    if !items.is_empty() && items.iter().all(DiscrepancyItem::is_resolved) {
        ReportStatus::Resolved
    } else {
        ReportStatus::Pending
    }
}

pub(crate) struct FileDiscrepancy<'a> {
    pub(crate) submission_id: &'a str,
    pub(crate) rubric_item_id: &'a str,
    pub(crate) student_thinks_should_be_applied: bool,
    pub(crate) explanation: &'a str,
}

/// Files (or re-files) one disputed rubric item. Idempotent per
/// (submission, rubric item): an unresolved prior filing is replaced, a
/// resolved one is immutable. The report is created lazily on first filing.
pub(crate) async fn file_discrepancy(
    pool: &PgPool,
    params: FileDiscrepancy<'_>,
) -> Result<(DiscrepancyReport, Vec<DiscrepancyItem>), DiscrepancyError> {
    if params.explanation.trim().is_empty() {
        return Err(DiscrepancyError::Invalid("explanation must not be empty".to_string()));
    }

    let submission = repositories::submissions::find_by_id(pool, params.submission_id)
        .await?
        .ok_or(DiscrepancyError::SubmissionNotFound)?;

    let rubric = repositories::problems::list_rubric_items(pool, &submission.problem_id).await?;
    if !rubric.iter().any(|item| item.id == params.rubric_item_id) {
        return Err(DiscrepancyError::UnknownRubricItem(params.rubric_item_id.to_string()));
    }

    let was_applied = submission.has_applied(params.rubric_item_id);
    let now = primitive_now_utc();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO discrepancy_reports
             (id, submission_id, student_id, course_id, assignment_id, problem_id, status,
              created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
         ON CONFLICT (submission_id) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&submission.id)
    .bind(&submission.student_id)
    .bind(&submission.course_id)
    .bind(&submission.assignment_id)
    .bind(&submission.problem_id)
    .bind(ReportStatus::Pending)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    // Locking the report row serializes filing and resolution per
    // submission.
    let report = sqlx::query_as::<_, DiscrepancyReport>(
        "SELECT id, submission_id, student_id, course_id, assignment_id, problem_id, status,
                created_at, updated_at
         FROM discrepancy_reports WHERE submission_id = $1 FOR UPDATE",
    )
    .bind(&submission.id)
    .fetch_one(&mut *tx)
    .await?;

    let existing = sqlx::query_as::<_, DiscrepancyItem>(
        "SELECT id, report_id, rubric_item_id, was_applied, student_thinks_should_be_applied,
                student_explanation, resolution_should_be_applied, resolution_explanation,
                resolved_by, resolved_at, created_at, updated_at
         FROM discrepancy_items WHERE report_id = $1 AND rubric_item_id = $2 FOR UPDATE",
    )
    .bind(&report.id)
    .bind(params.rubric_item_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(item) = existing {
        if item.is_resolved() {
            return Err(DiscrepancyError::AlreadyResolved(params.rubric_item_id.to_string()));
        }
    }

    sqlx::query(
        "INSERT INTO discrepancy_items
             (id, report_id, rubric_item_id, was_applied, student_thinks_should_be_applied,
              student_explanation, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
         ON CONFLICT (report_id, rubric_item_id) DO UPDATE
         SET was_applied = EXCLUDED.was_applied,
             student_thinks_should_be_applied = EXCLUDED.student_thinks_should_be_applied,
             student_explanation = EXCLUDED.student_explanation,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&report.id)
    .bind(params.rubric_item_id)
    .bind(was_applied)
    .bind(params.student_thinks_should_be_applied)
    .bind(params.explanation)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    // A fresh unresolved item always leaves the report pending.
    sqlx::query("UPDATE discrepancy_reports SET status = $1, updated_at = $2 WHERE id = $3")
        .bind(ReportStatus::Pending)
        .bind(now)
        .bind(&report.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    metrics::counter!("discrepancies_filed_total").increment(1);
    tracing::info!(
        submission_id = %submission.id,
        rubric_item_id = %params.rubric_item_id,
        "Discrepancy filed"
    );

    load_report(pool, &submission.id).await?.ok_or(DiscrepancyError::SubmissionNotFound)
}

pub(crate) async fn load_report(
    pool: &PgPool,
    submission_id: &str,
) -> Result<Option<(DiscrepancyReport, Vec<DiscrepancyItem>)>, DiscrepancyError> {
    let Some(report) =
        repositories::discrepancies::find_report_by_submission(pool, submission_id).await?
    else {
        return Ok(None);
    };

    let items = repositories::discrepancies::list_items(pool, &report.id).await?;

    Ok(Some((report, items)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;

    fn rubric_item(id: &str, points: f64) -> RubricItem {
        let now = primitive_now_utc();
        RubricItem {
            id: id.to_string(),
            problem_id: "prob-1".to_string(),
            description: format!("criterion {id}"),
            points,
            order_index: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn discrepancy_item(rubric_item_id: &str, resolved: bool) -> DiscrepancyItem {
        let now = primitive_now_utc();
        DiscrepancyItem {
            id: format!("item-{rubric_item_id}"),
            report_id: "report-1".to_string(),
            rubric_item_id: rubric_item_id.to_string(),
            was_applied: false,
            student_thinks_should_be_applied: true,
            student_explanation: "I showed this step".to_string(),
            resolution_should_be_applied: resolved.then_some(true),
            resolution_explanation: resolved.then(|| "agreed".to_string()),
            resolved_by: resolved.then(|| "teacher-1".to_string()),
            resolved_at: resolved.then(primitive_now_utc),
            created_at: now,
            updated_at: now,
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn classify_covers_every_rubric_item() {
        let rubric =
            vec![rubric_item("ri-1", 2.0), rubric_item("ri-2", 1.0), rubric_item("ri-3", -0.5)];

        let agreements = classify(&rubric, &ids(&["ri-1"]), &ids(&["ri-1", "ri-2"]));

        assert_eq!(agreements.len(), 3);
        assert_eq!(
            agreements[0],
            RubricItemAgreement {
                rubric_item_id: "ri-1".to_string(),
                authoritative: true,
                self_assessed: true,
                disputed: false,
            }
        );
        assert_eq!(
            agreements[1],
            RubricItemAgreement {
                rubric_item_id: "ri-2".to_string(),
                authoritative: false,
                self_assessed: true,
                disputed: true,
            }
        );
        // Present in neither set: agreeing-absent, still classified.
        assert_eq!(
            agreements[2],
            RubricItemAgreement {
                rubric_item_id: "ri-3".to_string(),
                authoritative: false,
                self_assessed: false,
                disputed: false,
            }
        );
    }

    #[test]
    fn classify_ignores_ids_outside_the_rubric() {
        let rubric = vec![rubric_item("ri-1", 1.0)];
        let agreements = classify(&rubric, &ids(&["ri-1", "stale-id"]), &ids(&[]));
        assert_eq!(agreements.len(), 1);
        assert!(agreements[0].disputed);
    }

    #[test]
    fn report_status_requires_every_item_resolved() {
        let items = vec![discrepancy_item("ri-1", true), discrepancy_item("ri-2", true)];
        assert_eq!(report_status(&items), ReportStatus::Resolved);
    }

    #[test]
    fn report_status_flips_back_with_new_unresolved_item() {
        let mut items = vec![discrepancy_item("ri-1", true)];
        assert_eq!(report_status(&items), ReportStatus::Resolved);

        items.push(discrepancy_item("ri-2", false));
        assert_eq!(report_status(&items), ReportStatus::Pending);
    }

    #[test]
    fn empty_report_is_pending() {
        assert_eq!(report_status(&[]), ReportStatus::Pending);
    }
}
