mod commands;
mod queries;

pub(crate) use commands::{set_self_assessment, upsert, upsert_grading, UpsertSubmission};
pub(crate) use queries::{find_by_id, find_ungraded};
