use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Problem, RubricItem};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ProblemCreateRequest {
    #[validate(length(min = 1, message = "question must not be empty"))]
    pub(crate) question: String,
    #[serde(default)]
    pub(crate) reference_solution: String,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) rubric: Vec<RubricItemPayload>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RubricItemPayload {
    #[validate(length(min = 1, message = "description must not be empty"))]
    pub(crate) description: String,
    pub(crate) points: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct RubricItemResponse {
    pub(crate) id: String,
    pub(crate) description: String,
    pub(crate) points: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProblemResponse {
    pub(crate) id: String,
    pub(crate) question: String,
    pub(crate) reference_solution: String,
    pub(crate) rubric_finalized: bool,
    pub(crate) max_points: f64,
    pub(crate) rubric: Vec<RubricItemResponse>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl ProblemResponse {
    pub(crate) fn from_parts(problem: Problem, rubric: Vec<RubricItem>) -> Self {
        Self {
            id: problem.id,
            question: problem.question,
            reference_solution: problem.reference_solution,
            rubric_finalized: problem.rubric_finalized,
            max_points: max_points(&rubric),
            rubric: rubric
                .into_iter()
                .map(|item| RubricItemResponse {
                    id: item.id,
                    description: item.description,
                    points: item.points,
                })
                .collect(),
            created_at: format_primitive(problem.created_at),
            updated_at: format_primitive(problem.updated_at),
        }
    }
}

/// The ceiling is the sum of positive item values; negative items only
/// deduct.
pub(crate) fn max_points(rubric: &[RubricItem]) -> f64 {
    rubric.iter().map(|item| item.points.max(0.0)).sum()
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

    #[test]
    fn max_points_ignores_negative_items() {
        let rubric = vec![
            rubric_item("ri-1", 2.0),
            rubric_item("ri-2", 1.5),
            rubric_item("ri-3", -1.0),
        ];
        assert_eq!(max_points(&rubric), 3.5);
    }

    #[test]
    fn max_points_of_empty_rubric_is_zero() {
        assert_eq!(max_points(&[]), 0.0);
    }
}
