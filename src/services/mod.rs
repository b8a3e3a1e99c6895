pub(crate) mod bulk_grading;
pub(crate) mod grading_jobs;
pub(crate) mod reconciliation;
pub(crate) mod resolution;
pub(crate) mod scorer;
