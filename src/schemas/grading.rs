use serde::{Deserialize, Serialize};

use crate::services::bulk_grading::BulkGradingProgress;
use crate::services::grading_jobs::{JobSnapshot, JobState};

#[derive(Debug, Deserialize, Default)]
pub(crate) struct BulkGradingRequest {
    #[serde(default)]
    pub(crate) concurrency: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BulkGradingStartResponse {
    pub(crate) job_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct GradingJobResponse {
    pub(crate) job_id: String,
    pub(crate) state: JobState,
    pub(crate) cancelled: bool,
    pub(crate) progress: BulkGradingProgress,
    pub(crate) error: Option<String>,
}

impl From<JobSnapshot> for GradingJobResponse {
    fn from(snapshot: JobSnapshot) -> Self {
        Self {
            job_id: snapshot.id,
            state: snapshot.state,
            cancelled: snapshot.cancelled,
            progress: snapshot.progress,
            error: snapshot.error,
        }
    }
}
