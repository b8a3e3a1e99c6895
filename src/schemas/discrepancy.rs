use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{DiscrepancyItem, DiscrepancyReport};
use crate::db::types::ReportStatus;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct FileDiscrepancyRequest {
    #[validate(length(min = 1, message = "rubric_item_id must not be empty"))]
    pub(crate) rubric_item_id: String,
    pub(crate) student_thinks_should_be_applied: bool,
    #[validate(length(min = 1, message = "explanation must not be empty"))]
    pub(crate) explanation: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ResolveDiscrepancyRequest {
    pub(crate) should_be_applied: bool,
    #[validate(length(min = 1, message = "explanation must not be empty"))]
    pub(crate) explanation: String,
    #[validate(length(min = 1, message = "resolved_by must not be empty"))]
    pub(crate) resolved_by: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResolutionResponse {
    pub(crate) should_be_applied: bool,
    pub(crate) explanation: String,
    pub(crate) resolved_by: String,
    pub(crate) resolved_at: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct DiscrepancyItemResponse {
    pub(crate) rubric_item_id: String,
    pub(crate) was_applied: bool,
    pub(crate) student_thinks_should_be_applied: bool,
    pub(crate) student_explanation: String,
    pub(crate) resolution: Option<ResolutionResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DiscrepancyReportResponse {
    pub(crate) id: String,
    pub(crate) submission_id: String,
    pub(crate) student_id: String,
    pub(crate) course_id: String,
    pub(crate) assignment_id: String,
    pub(crate) problem_id: String,
    pub(crate) status: ReportStatus,
    pub(crate) items: Vec<DiscrepancyItemResponse>,
}

impl DiscrepancyReportResponse {
    pub(crate) fn from_parts(report: DiscrepancyReport, items: Vec<DiscrepancyItem>) -> Self {
        Self {
            id: report.id,
            submission_id: report.submission_id,
            student_id: report.student_id,
            course_id: report.course_id,
            assignment_id: report.assignment_id,
            problem_id: report.problem_id,
            status: report.status,
            items: items.into_iter().map(DiscrepancyItemResponse::from).collect(),
        }
    }
}

impl From<DiscrepancyItem> for DiscrepancyItemResponse {
    fn from(item: DiscrepancyItem) -> Self {
        let resolution = match (
            item.resolution_should_be_applied,
            item.resolution_explanation,
            item.resolved_by,
            item.resolved_at,
        ) {
            (Some(should_be_applied), Some(explanation), Some(resolved_by), Some(resolved_at)) => {
                Some(ResolutionResponse {
                    should_be_applied,
                    explanation,
                    resolved_by,
                    resolved_at: format_primitive(resolved_at),
                })
            }
            _ => None,
        };

        Self {
            rubric_item_id: item.rubric_item_id,
            was_applied: item.was_applied,
            student_thinks_should_be_applied: item.student_thinks_should_be_applied,
            student_explanation: item.student_explanation,
            resolution,
        }
    }
}
