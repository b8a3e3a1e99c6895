use validator::Validate;

use crate::api::errors::ApiError;

pub(crate) const MAX_ITEM_POINTS: f64 = 100.0;

pub(crate) fn validate_body<T: Validate>(body: &T) -> Result<(), ApiError> {
    body.validate().map_err(|errors| ApiError::BadRequest(errors.to_string()))
}

/// Rubric item values are signed and limited to half-point granularity.
pub(crate) fn validate_rubric_points(points: f64) -> Result<(), ApiError> {
    if !points.is_finite() || points.abs() > MAX_ITEM_POINTS {
        return Err(ApiError::BadRequest(format!(
            "points must be a finite value within ±{MAX_ITEM_POINTS}"
        )));
    }

    if (points * 2.0).fract() != 0.0 {
        return Err(ApiError::BadRequest("points must be in 0.5 increments".to_string()));
    }

    Ok(())
}
