use std::sync::Arc;

use sqlx::PgPool;

use crate::core::config::Settings;
use crate::services::grading_jobs::GradingJobs;
use crate::services::scorer::ScorerGateway;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    scorer: Arc<dyn ScorerGateway>,
    grading_jobs: GradingJobs,
}

impl AppState {
    pub(crate) fn new(settings: Settings, db: PgPool, scorer: Arc<dyn ScorerGateway>) -> Self {
        Self {
            inner: Arc::new(InnerState { settings, db, scorer, grading_jobs: GradingJobs::new() }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn scorer(&self) -> Arc<dyn ScorerGateway> {
        self.inner.scorer.clone()
    }

    pub(crate) fn grading_jobs(&self) -> &GradingJobs {
        &self.inner.grading_jobs
    }
}
