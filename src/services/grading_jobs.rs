use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::services::bulk_grading::{
    self, BulkGradingParams, BulkGradingProgress, GradingStore,
};
use crate::services::scorer::ScorerGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum JobState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub(crate) struct JobSnapshot {
    pub(crate) id: String,
    pub(crate) state: JobState,
    pub(crate) cancelled: bool,
    pub(crate) progress: BulkGradingProgress,
    pub(crate) error: Option<String>,
}

struct JobEntry {
    state: JobState,
    cancelled: bool,
    progress: BulkGradingProgress,
    error: Option<String>,
    cancel: watch::Sender<bool>,
}

/// Process-local registry of bulk grading runs. Progress lives only as
/// snapshot copies here; the run itself owns the counters.
#[derive(Clone)]
pub(crate) struct GradingJobs {
    inner: Arc<Mutex<HashMap<String, JobEntry>>>,
}

impl GradingJobs {
    pub(crate) fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub(crate) fn start(
        &self,
        store: Arc<dyn GradingStore>,
        scorer: Arc<dyn ScorerGateway>,
        params: BulkGradingParams,
    ) -> String {
        let job_id = Uuid::new_v4().to_string();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        self.inner.lock().expect("job registry poisoned").insert(
            job_id.clone(),
            JobEntry {
                state: JobState::Running,
                cancelled: false,
                progress: BulkGradingProgress::default(),
                error: None,
                cancel: cancel_tx,
            },
        );

        let registry = self.inner.clone();
        let forward_id = job_id.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = progress_rx.recv().await {
                if let Some(entry) =
                    registry.lock().expect("job registry poisoned").get_mut(&forward_id)
                {
                    entry.progress = snapshot;
                }
            }
        });

        let registry = self.inner.clone();
        let run_id = job_id.clone();
        tokio::spawn(async move {
            let result =
                bulk_grading::run_bulk_grading(store, scorer, params, Some(progress_tx), cancel_rx)
                    .await;

            let mut jobs = registry.lock().expect("job registry poisoned");
            let Some(entry) = jobs.get_mut(&run_id) else {
                return;
            };

            match result {
                Ok(final_progress) => {
                    entry.progress = final_progress;
                    entry.state = JobState::Completed;
                }
                Err(err) => {
                    tracing::error!(job_id = %run_id, error = %err, "Bulk grading job failed");
                    entry.state = JobState::Failed;
                    entry.error = Some(err.to_string());
                }
            }
        });

        job_id
    }

    pub(crate) fn snapshot(&self, job_id: &str) -> Option<JobSnapshot> {
        let jobs = self.inner.lock().expect("job registry poisoned");
        jobs.get(job_id).map(|entry| JobSnapshot {
            id: job_id.to_string(),
            state: entry.state,
            cancelled: entry.cancelled,
            progress: entry.progress,
            error: entry.error.clone(),
        })
    }

    /// Cooperative: in-flight units finish, no new units start. Returns
    /// `None` for an unknown job, `false` when the job already ended.
    pub(crate) fn cancel(&self, job_id: &str) -> Option<bool> {
        let mut jobs = self.inner.lock().expect("job registry poisoned");
        let entry = jobs.get_mut(job_id)?;

        if entry.state != JobState::Running {
            return Some(false);
        }

        entry.cancelled = true;
        let _ = entry.cancel.send(true);
        Some(true)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::services::bulk_grading::{GradingUnit, ProblemContext};
    use crate::services::scorer::{RubricItemSpec, ScoreRequest, ScoreResult, ScorerError};

    struct StubStore {
        units: usize,
    }

    #[async_trait]
    impl GradingStore for StubStore {
        async fn problem_context(
            &self,
            _problem_id: &str,
        ) -> anyhow::Result<Option<ProblemContext>> {
            Ok(Some(ProblemContext {
                question: "q".to_string(),
                reference_solution: "s".to_string(),
                rubric: vec![RubricItemSpec {
                    id: "ri-1".to_string(),
                    description: "d".to_string(),
                    points: 1.0,
                }],
            }))
        }

        async fn find_ungraded(
            &self,
            _assignment_id: &str,
            _problem_id: &str,
        ) -> anyhow::Result<Vec<GradingUnit>> {
            Ok((0..self.units)
                .map(|n| GradingUnit {
                    submission_id: format!("sub-{n}"),
                    answer_text: "a".to_string(),
                })
                .collect())
        }

        async fn upsert_grading(
            &self,
            _submission_id: &str,
            _applied_rubric_item_ids: &[String],
            _feedback: &str,
            _graded_by: &str,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StubScorer {
        delay: Duration,
    }

    #[async_trait]
    impl ScorerGateway for StubScorer {
        async fn score(&self, _request: ScoreRequest) -> Result<ScoreResult, ScorerError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(ScoreResult {
                applied_rubric_item_ids: vec!["ri-1".to_string()],
                feedback: "ok".to_string(),
            })
        }
    }

    struct FailingStore;

    #[async_trait]
    impl GradingStore for FailingStore {
        async fn problem_context(
            &self,
            _problem_id: &str,
        ) -> anyhow::Result<Option<ProblemContext>> {
            anyhow::bail!("database unavailable")
        }

        async fn find_ungraded(
            &self,
            _assignment_id: &str,
            _problem_id: &str,
        ) -> anyhow::Result<Vec<GradingUnit>> {
            anyhow::bail!("database unavailable")
        }

        async fn upsert_grading(
            &self,
            _submission_id: &str,
            _applied_rubric_item_ids: &[String],
            _feedback: &str,
            _graded_by: &str,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn params() -> BulkGradingParams {
        BulkGradingParams {
            assignment_id: "hw-1".to_string(),
            problem_id: "prob-1".to_string(),
            concurrency: 2,
            graded_by: "ai".to_string(),
        }
    }

    async fn wait_for_terminal(jobs: &GradingJobs, job_id: &str) -> JobSnapshot {
        for _ in 0..200 {
            let snapshot = jobs.snapshot(job_id).expect("job registered");
            if snapshot.state != JobState::Running {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn job_runs_to_completion() {
        let jobs = GradingJobs::new();
        let job_id = jobs.start(
            Arc::new(StubStore { units: 4 }),
            Arc::new(StubScorer { delay: Duration::from_millis(5) }),
            params(),
        );

        let snapshot = wait_for_terminal(&jobs, &job_id).await;
        assert_eq!(snapshot.state, JobState::Completed);
        assert!(!snapshot.cancelled);
        assert_eq!(snapshot.progress.total, 4);
        assert_eq!(snapshot.progress.completed, 4);
        assert_eq!(snapshot.progress.failed, 0);
    }

    #[tokio::test]
    async fn fetch_failure_marks_job_failed() {
        let jobs = GradingJobs::new();
        let job_id = jobs.start(
            Arc::new(FailingStore),
            Arc::new(StubScorer { delay: Duration::ZERO }),
            params(),
        );

        let snapshot = wait_for_terminal(&jobs, &job_id).await;
        assert_eq!(snapshot.state, JobState::Failed);
        assert!(snapshot.error.unwrap().contains("database unavailable"));
    }

    #[tokio::test]
    async fn cancel_marks_job_and_stops_new_units() {
        let jobs = GradingJobs::new();
        let job_id = jobs.start(
            Arc::new(StubStore { units: 20 }),
            Arc::new(StubScorer { delay: Duration::from_millis(30) }),
            BulkGradingParams { concurrency: 1, ..params() },
        );

        assert_eq!(jobs.cancel(&job_id), Some(true));

        let snapshot = wait_for_terminal(&jobs, &job_id).await;
        assert_eq!(snapshot.state, JobState::Completed);
        assert!(snapshot.cancelled);
        let ran = snapshot.progress.completed + snapshot.progress.failed;
        assert!(ran < 20, "ran {ran}");
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let jobs = GradingJobs::new();
        assert!(jobs.snapshot("missing").is_none());
        assert!(jobs.cancel("missing").is_none());
    }
}
