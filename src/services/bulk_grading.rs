use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use crate::repositories;
use crate::services::scorer::{RubricItemSpec, ScoreRequest, ScorerGateway};

/// One submission's worth of work for a batch run.
#[derive(Debug, Clone)]
pub(crate) struct GradingUnit {
    pub(crate) submission_id: String,
    pub(crate) answer_text: String,
}

/// Problem data shared by every unit in a batch, loaded once up front.
#[derive(Debug, Clone)]
pub(crate) struct ProblemContext {
    pub(crate) question: String,
    pub(crate) reference_solution: String,
    pub(crate) rubric: Vec<RubricItemSpec>,
}

#[async_trait]
pub(crate) trait GradingStore: Send + Sync {
    async fn problem_context(&self, problem_id: &str) -> anyhow::Result<Option<ProblemContext>>;

    async fn find_ungraded(
        &self,
        assignment_id: &str,
        problem_id: &str,
    ) -> anyhow::Result<Vec<GradingUnit>>;

    async fn upsert_grading(
        &self,
        submission_id: &str,
        applied_rubric_item_ids: &[String],
        feedback: &str,
        graded_by: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct BulkGradingProgress {
    pub(crate) total: usize,
    pub(crate) completed: usize,
    pub(crate) failed: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct BulkGradingParams {
    pub(crate) assignment_id: String,
    pub(crate) problem_id: String,
    pub(crate) concurrency: usize,
    pub(crate) graded_by: String,
}

#[derive(Debug, Error)]
pub(crate) enum BulkGradingError {
    #[error("failed to fetch grading workload: {0}")]
    Fetch(String),
}

enum UnitOutcome {
    Completed,
    Failed,
}

/// Runs one grading batch: the eligible set is fixed at invocation start,
/// units run under a semaphore of size `concurrency`, per-unit failures are
/// counted without aborting siblings, and every finished unit publishes a
/// snapshot copy of the counters to the optional sink. Cancellation is
/// cooperative: units observe the signal after acquiring their permit and
/// before calling the scorer, so in-flight calls always finish.
pub(crate) async fn run_bulk_grading(
    store: Arc<dyn GradingStore>,
    scorer: Arc<dyn ScorerGateway>,
    params: BulkGradingParams,
    progress_sink: Option<mpsc::UnboundedSender<BulkGradingProgress>>,
    cancel: watch::Receiver<bool>,
) -> Result<BulkGradingProgress, BulkGradingError> {
    let context = store
        .problem_context(&params.problem_id)
        .await
        .map_err(|err| BulkGradingError::Fetch(err.to_string()))?
        .ok_or_else(|| {
            BulkGradingError::Fetch(format!("problem {} not found", params.problem_id))
        })?;

    let units = store
        .find_ungraded(&params.assignment_id, &params.problem_id)
        .await
        .map_err(|err| BulkGradingError::Fetch(err.to_string()))?;

    let progress = Arc::new(Mutex::new(BulkGradingProgress {
        total: units.len(),
        completed: 0,
        failed: 0,
    }));

    tracing::info!(
        assignment_id = %params.assignment_id,
        problem_id = %params.problem_id,
        total = units.len(),
        concurrency = params.concurrency,
        "Starting bulk grading run"
    );
    metrics::counter!("bulk_grading_runs_total").increment(1);

    let context = Arc::new(context);
    let semaphore = Arc::new(Semaphore::new(params.concurrency.max(1)));
    let graded_by = Arc::new(params.graded_by.clone());

    let mut join_set = JoinSet::new();

    for unit in units {
        let store = store.clone();
        let scorer = scorer.clone();
        let context = context.clone();
        let graded_by = graded_by.clone();
        let semaphore = semaphore.clone();
        let progress = progress.clone();
        let progress_sink = progress_sink.clone();
        let cancel = cancel.clone();

        join_set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            if *cancel.borrow() {
                return;
            }

            let outcome = grade_unit(&*store, &*scorer, &context, &graded_by, &unit).await;

            let snapshot = {
                let mut counters = progress.lock().expect("progress counters poisoned");
                match outcome {
                    UnitOutcome::Completed => counters.completed += 1,
                    UnitOutcome::Failed => counters.failed += 1,
                }
                *counters
            };

            if let Some(sink) = &progress_sink {
                let _ = sink.send(snapshot);
            }
        });
    }

    while let Some(joined) = join_set.join_next().await {
        if let Err(err) = joined {
            // A panicked unit still has to be accounted for, or the final
            // counts would no longer add up to the number of units that ran.
            tracing::error!(error = %err, "Bulk grading unit panicked");
            let snapshot = {
                let mut counters = progress.lock().expect("progress counters poisoned");
                counters.failed += 1;
                *counters
            };
            if let Some(sink) = &progress_sink {
                let _ = sink.send(snapshot);
            }
        }
    }

    let final_snapshot = *progress.lock().expect("progress counters poisoned");

    tracing::info!(
        assignment_id = %params.assignment_id,
        problem_id = %params.problem_id,
        total = final_snapshot.total,
        completed = final_snapshot.completed,
        failed = final_snapshot.failed,
        "Bulk grading run finished"
    );

    Ok(final_snapshot)
}

async fn grade_unit(
    store: &dyn GradingStore,
    scorer: &dyn ScorerGateway,
    context: &ProblemContext,
    graded_by: &str,
    unit: &GradingUnit,
) -> UnitOutcome {
    let timer = Instant::now();

    let request = ScoreRequest {
        submission_id: unit.submission_id.clone(),
        question: context.question.clone(),
        reference_solution: context.reference_solution.clone(),
        answer_text: unit.answer_text.clone(),
        rubric: context.rubric.clone(),
    };

    let result = match scorer.score(request).await {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(submission_id = %unit.submission_id, error = %err, "Scorer call failed");
            metrics::counter!("bulk_grading_units_total", "status" => "failed").increment(1);
            return UnitOutcome::Failed;
        }
    };

    if let Err(err) = store
        .upsert_grading(
            &unit.submission_id,
            &result.applied_rubric_item_ids,
            &result.feedback,
            graded_by,
        )
        .await
    {
        tracing::warn!(
            submission_id = %unit.submission_id,
            error = %err,
            "Failed to persist grading result"
        );
        metrics::counter!("bulk_grading_units_total", "status" => "failed").increment(1);
        return UnitOutcome::Failed;
    }

    metrics::counter!("bulk_grading_units_total", "status" => "completed").increment(1);
    metrics::histogram!("bulk_grading_unit_duration_seconds")
        .record(timer.elapsed().as_secs_f64());

    UnitOutcome::Completed
}

/// Postgres-backed store used by the API; the eligibility filter lives in
/// the ungraded query, so already-graded submissions never reach a batch.
#[derive(Clone)]
pub(crate) struct PgGradingStore {
    pool: PgPool,
}

impl PgGradingStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GradingStore for PgGradingStore {
    async fn problem_context(&self, problem_id: &str) -> anyhow::Result<Option<ProblemContext>> {
        let Some(problem) = repositories::problems::find_by_id(&self.pool, problem_id).await?
        else {
            return Ok(None);
        };

        let rubric = repositories::problems::list_rubric_items(&self.pool, problem_id)
            .await?
            .into_iter()
            .map(|item| RubricItemSpec {
                id: item.id,
                description: item.description,
                points: item.points,
            })
            .collect();

        Ok(Some(ProblemContext {
            question: problem.question,
            reference_solution: problem.reference_solution,
            rubric,
        }))
    }

    async fn find_ungraded(
        &self,
        assignment_id: &str,
        problem_id: &str,
    ) -> anyhow::Result<Vec<GradingUnit>> {
        let submissions =
            repositories::submissions::find_ungraded(&self.pool, assignment_id, problem_id).await?;

        Ok(submissions
            .into_iter()
            .map(|submission| GradingUnit {
                submission_id: submission.id,
                answer_text: submission.answer_text,
            })
            .collect())
    }

    async fn upsert_grading(
        &self,
        submission_id: &str,
        applied_rubric_item_ids: &[String],
        feedback: &str,
        graded_by: &str,
    ) -> anyhow::Result<()> {
        let updated = repositories::submissions::upsert_grading(
            &self.pool,
            submission_id,
            applied_rubric_item_ids,
            Some(feedback),
            graded_by,
            crate::core::time::primitive_now_utc(),
        )
        .await?;

        if !updated {
            anyhow::bail!("submission {submission_id} no longer exists");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::services::scorer::{ScoreResult, ScorerError};

    struct FakeStore {
        units: Vec<GradingUnit>,
        graded: Mutex<Vec<String>>,
        fail_writes_for: HashSet<String>,
    }

    impl FakeStore {
        fn with_units(ids: &[&str]) -> Self {
            Self {
                units: ids
                    .iter()
                    .map(|id| GradingUnit {
                        submission_id: id.to_string(),
                        answer_text: format!("answer for {id}"),
                    })
                    .collect(),
                graded: Mutex::new(Vec::new()),
                fail_writes_for: HashSet::new(),
            }
        }

        fn failing_writes(mut self, ids: &[&str]) -> Self {
            self.fail_writes_for = ids.iter().map(|id| id.to_string()).collect();
            self
        }
    }

    #[async_trait]
    impl GradingStore for FakeStore {
        async fn problem_context(
            &self,
            _problem_id: &str,
        ) -> anyhow::Result<Option<ProblemContext>> {
            Ok(Some(ProblemContext {
                question: "What is the rate law?".to_string(),
                reference_solution: "rate = k[A][B]".to_string(),
                rubric: vec![RubricItemSpec {
                    id: "ri-1".to_string(),
                    description: "States the correct rate law".to_string(),
                    points: 2.0,
                }],
            }))
        }

        async fn find_ungraded(
            &self,
            _assignment_id: &str,
            _problem_id: &str,
        ) -> anyhow::Result<Vec<GradingUnit>> {
            Ok(self.units.clone())
        }

        async fn upsert_grading(
            &self,
            submission_id: &str,
            _applied_rubric_item_ids: &[String],
            _feedback: &str,
            _graded_by: &str,
        ) -> anyhow::Result<()> {
            if self.fail_writes_for.contains(submission_id) {
                anyhow::bail!("simulated store write failure");
            }
            self.graded.lock().unwrap().push(submission_id.to_string());
            Ok(())
        }
    }

    struct FakeScorer {
        fail_for: HashSet<String>,
        delay: Duration,
        in_flight: AtomicUsize,
        high_water: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl FakeScorer {
        fn new() -> Self {
            Self {
                fail_for: HashSet::new(),
                delay: Duration::from_millis(0),
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_for(mut self, ids: &[&str]) -> Self {
            self.fail_for = ids.iter().map(|id| id.to_string()).collect();
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn high_water_mark(&self) -> usize {
            self.high_water.load(Ordering::SeqCst)
        }

        fn seen(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ScorerGateway for FakeScorer {
        async fn score(&self, request: ScoreRequest) -> Result<ScoreResult, ScorerError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(current, Ordering::SeqCst);
            self.calls.lock().unwrap().push(request.submission_id.clone());

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_for.contains(&request.submission_id) {
                return Err(ScorerError::Unavailable("simulated outage".to_string()));
            }

            Ok(ScoreResult {
                applied_rubric_item_ids: vec!["ri-1".to_string()],
                feedback: "looks right".to_string(),
            })
        }
    }

    fn params(concurrency: usize) -> BulkGradingParams {
        BulkGradingParams {
            assignment_id: "hw-1".to_string(),
            problem_id: "prob-1".to_string(),
            concurrency,
            graded_by: "ai".to_string(),
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        // The receiver keeps returning the last value after the sender drops.
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[tokio::test]
    async fn empty_batch_completes_immediately() {
        let store = Arc::new(FakeStore::with_units(&[]));
        let scorer = Arc::new(FakeScorer::new());

        let progress = run_bulk_grading(store, scorer, params(2), None, no_cancel())
            .await
            .expect("batch");

        assert_eq!(progress, BulkGradingProgress { total: 0, completed: 0, failed: 0 });
    }

    #[tokio::test]
    async fn counts_add_up_with_mixed_failures() {
        let ids: Vec<String> = (1..=10).map(|n| format!("sub-{n}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let store = Arc::new(FakeStore::with_units(&id_refs));
        let scorer = Arc::new(FakeScorer::new().failing_for(&["sub-3", "sub-7"]));

        let progress =
            run_bulk_grading(store.clone(), scorer, params(3), None, no_cancel())
                .await
                .expect("batch");

        assert_eq!(progress, BulkGradingProgress { total: 10, completed: 8, failed: 2 });

        let graded = store.graded.lock().unwrap().clone();
        assert_eq!(graded.len(), 8);
        assert!(!graded.contains(&"sub-3".to_string()));
        assert!(!graded.contains(&"sub-7".to_string()));
    }

    #[tokio::test]
    async fn store_write_failure_counts_as_failed() {
        let store =
            Arc::new(FakeStore::with_units(&["sub-1", "sub-2"]).failing_writes(&["sub-2"]));
        let scorer = Arc::new(FakeScorer::new());

        let progress = run_bulk_grading(store, scorer, params(2), None, no_cancel())
            .await
            .expect("batch");

        assert_eq!(progress, BulkGradingProgress { total: 2, completed: 1, failed: 1 });
    }

    #[tokio::test]
    async fn concurrency_limit_is_respected() {
        let ids: Vec<String> = (1..=12).map(|n| format!("sub-{n}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let store = Arc::new(FakeStore::with_units(&id_refs));
        let scorer = Arc::new(FakeScorer::new().with_delay(Duration::from_millis(25)));

        let progress =
            run_bulk_grading(store, scorer.clone(), params(3), None, no_cancel())
                .await
                .expect("batch");

        assert_eq!(progress.completed, 12);
        assert!(scorer.high_water_mark() <= 3, "high water {}", scorer.high_water_mark());
    }

    #[tokio::test]
    async fn only_the_fetched_set_reaches_the_scorer() {
        // The eligibility filter runs once, in the store query; the
        // orchestrator grades exactly what the query returned.
        let store = Arc::new(FakeStore::with_units(&["sub-1", "sub-4"]));
        let scorer = Arc::new(FakeScorer::new());

        let progress = run_bulk_grading(store, scorer.clone(), params(2), None, no_cancel())
            .await
            .expect("batch");

        assert_eq!(progress.completed, 2);
        let mut seen = scorer.seen();
        seen.sort();
        assert_eq!(seen, vec!["sub-1".to_string(), "sub-4".to_string()]);
    }

    #[tokio::test]
    async fn progress_snapshots_arrive_per_outcome() {
        let store = Arc::new(FakeStore::with_units(&["sub-1", "sub-2", "sub-3"]));
        let scorer = Arc::new(FakeScorer::new().failing_for(&["sub-2"]));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let progress = run_bulk_grading(store, scorer, params(1), Some(tx), no_cancel())
            .await
            .expect("batch");

        let mut snapshots = Vec::new();
        while let Ok(snapshot) = rx.try_recv() {
            snapshots.push(snapshot);
        }

        assert_eq!(snapshots.len(), 3);
        for (index, snapshot) in snapshots.iter().enumerate() {
            assert_eq!(snapshot.total, 3);
            assert_eq!(snapshot.completed + snapshot.failed, index + 1);
        }
        assert_eq!(*snapshots.last().unwrap(), progress);
        assert_eq!(progress, BulkGradingProgress { total: 3, completed: 2, failed: 1 });
    }

    #[tokio::test]
    async fn cancellation_stops_new_units_but_finishes_in_flight() {
        let ids: Vec<String> = (1..=6).map(|n| format!("sub-{n}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let store = Arc::new(FakeStore::with_units(&id_refs));
        let scorer = Arc::new(FakeScorer::new().with_delay(Duration::from_millis(40)));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let run = tokio::spawn(run_bulk_grading(
            store,
            scorer.clone(),
            params(1),
            Some(progress_tx),
            cancel_rx,
        ));

        // Cancel as soon as the first unit reports; with concurrency 1 at
        // most one further unit can already hold the permit.
        let first = progress_rx.recv().await.expect("first snapshot");
        assert_eq!(first.completed + first.failed, 1);
        cancel_tx.send(true).expect("cancel signal");

        let progress = run.await.expect("join").expect("batch");

        assert_eq!(progress.total, 6);
        let ran = progress.completed + progress.failed;
        assert!(ran >= 1 && ran < 6, "ran {ran}");
        assert_eq!(scorer.seen().len(), ran);
    }
}
