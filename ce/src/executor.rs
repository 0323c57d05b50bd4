//! ChainExecutor - advances chains under a hard wall-clock ceiling
//!
//! One activation drains the queue in strict enqueue order, executing steps
//! until the work budget runs out. The budget is the host ceiling scaled by
//! a configured fraction, minus an adaptive safety margin sized from the
//! previous activation's measured persist cycle, so time to flush state is
//! always reserved before the hard deadline. Suspension is explicit:
//! persist, re-enqueue, request a continuation, return.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use chainstore::{ChainProgress, ChainStore, Step, Task};

use crate::config::ExecutorConfig;
use crate::error::ExecError;
use crate::worker::{ContinuationScheduler, WorkerOutcome, WorkerResolver};

/// State of a chain within the execution state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Waiting in the queue
    Queued,
    /// A step is executing
    Running,
    /// A step just finished; the loop continues
    StepComplete,
    /// Every step finished; definition and progress removed
    Completed,
    /// Budget exhausted or retryable failure; persisted and re-enqueued
    Suspended,
    /// Superseded by a replacement; aborted cooperatively
    Aborted,
    /// Retries exhausted; removed permanently
    Failed,
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::StepComplete => "step_complete",
            Self::Completed => "completed",
            Self::Suspended => "suspended",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one chain within an activation
#[derive(Debug, Clone)]
pub struct ChainReport {
    pub chain_id: String,
    pub state: ChainState,
    /// Steps completed during this activation
    pub steps_completed: u32,
}

/// Outcome of one activation
#[derive(Debug, Default)]
pub struct ActivationReport {
    /// Per-chain outcomes, in processing order
    pub chains: Vec<ChainReport>,
    /// Measured duration of the final flush; feeds the next activation's
    /// safety margin
    pub persist_duration: Duration,
    /// Whether the continuation hook accepted a request for a future
    /// activation
    pub continuation_requested: bool,
}

/// How one step execution ended
enum StepOutcome {
    Completed,
    Failed,
    DeadlineHit,
}

/// How one task execution ended
enum TaskRun {
    Done(WorkerOutcome),
    Deadline,
}

/// Time-budgeted executor over a [`ChainStore`]
///
/// The worker-lookup collaborator is passed explicitly at construction; the
/// continuation scheduler is optional but without one nothing will resume
/// suspended work.
pub struct ChainExecutor {
    store: Arc<ChainStore>,
    resolver: Arc<dyn WorkerResolver>,
    config: ExecutorConfig,
    continuation: Option<Arc<dyn ContinuationScheduler>>,
    shutdown_requested: AtomicBool,
    /// Duration of the previous flush/cleanup cycle
    last_persist: std::sync::Mutex<Duration>,
}

impl ChainExecutor {
    /// Create a new executor
    pub fn new(store: Arc<ChainStore>, resolver: Arc<dyn WorkerResolver>, config: ExecutorConfig) -> Self {
        Self {
            store,
            resolver,
            config,
            continuation: None,
            shutdown_requested: AtomicBool::new(false),
            last_persist: std::sync::Mutex::new(Duration::ZERO),
        }
    }

    /// Register the host's continuation scheduler
    pub fn with_continuation_scheduler(mut self, scheduler: Arc<dyn ContinuationScheduler>) -> Self {
        self.continuation = Some(scheduler);
        self
    }

    /// Run one activation under the host-imposed `ceiling`
    ///
    /// Drains the queue until the work budget is spent, then flushes all
    /// buffered progress and, when work remains, asks the host for a
    /// continuation. Persistence always precedes the continuation hook, so
    /// a failing hook cannot corrupt durable state.
    pub async fn run_activation(&self, ceiling: Duration) -> Result<ActivationReport, ExecError> {
        // A fresh activation clears any earlier shutdown request
        self.shutdown_requested.store(false, Ordering::SeqCst);

        let last_persist = *self.last_persist.lock().unwrap();
        let budget = self.config.budget(ceiling, last_persist);
        let deadline = Instant::now() + budget;
        debug!(?ceiling, ?budget, ?last_persist, "Activation started");

        if let Some(report) = self.store.maybe_run_maintenance().await? {
            debug!(?report, "Ran maintenance sweep");
        }

        let mut report = ActivationReport::default();
        let mut attempted: Vec<String> = Vec::new();
        let mut out_of_budget = false;

        loop {
            if self.shutdown_requested.load(Ordering::SeqCst) {
                debug!("Shutdown requested; ending activation early");
                break;
            }
            if Instant::now() >= deadline {
                out_of_budget = true;
                break;
            }

            let Some(id) = self.store.dequeue_chain().await? else {
                break;
            };

            // A chain that already ran this activation (retryable failure)
            // waits for a later one; everything behind it has cycled too.
            if attempted.iter().any(|a| a == &id) {
                self.store.requeue(&id).await?;
                break;
            }
            attempted.push(id.clone());

            // Superseded before pickup: skip and clear the marker
            if self.store.has_tombstone(&id).await {
                self.store.clear_tombstone(&id).await?;
                info!(chain_id = %id, "Skipping superseded chain");
                report.chains.push(ChainReport {
                    chain_id: id,
                    state: ChainState::Aborted,
                    steps_completed: 0,
                });
                continue;
            }

            let (chain_report, hit_deadline) = self.run_chain(&id, deadline).await?;
            report.chains.push(chain_report);
            if hit_deadline {
                out_of_budget = true;
                break;
            }
        }

        // Persist everything before any continuation request
        let persist_start = std::time::Instant::now();
        let flush_result = self.store.flush_progress().await;
        let persist_duration = persist_start.elapsed();
        *self.last_persist.lock().unwrap() = persist_duration;
        report.persist_duration = persist_duration;
        flush_result?;

        let pending = self.store.queue_len().await;
        if out_of_budget || pending > 0 {
            report.continuation_requested = self.request_continuation(pending);
        }

        debug!(
            chains = report.chains.len(),
            ?persist_duration,
            pending,
            "Activation finished"
        );
        Ok(report)
    }

    /// Execute one chain until completion, failure, or the deadline
    ///
    /// Returns the report plus whether the deadline was hit.
    async fn run_chain(&self, id: &str, deadline: Instant) -> Result<(ChainReport, bool), ExecError> {
        let mut steps_completed = 0u32;

        let Some(chain) = self.store.load_chain_definition(id).await? else {
            warn!(chain_id = %id, "Queue entry without definition; dropping");
            self.store.delete_chain_progress(id).await?;
            return Ok((self.report(id, ChainState::Aborted, 0), false));
        };

        let mut progress = match self.store.load_chain_progress(id).await? {
            Some(progress) => progress,
            None => ChainProgress::new(id, chain.steps.len() as u32, self.config.default_max_retries),
        };
        debug!(
            chain_id = %id,
            state = %ChainState::Running,
            resume_step = ?progress.next_step_index(),
            "Chain picked up"
        );

        while let Some(step_idx) = progress.next_step_index() {
            // Supersession check at every step boundary: abort without
            // touching the replacement chain's files.
            if self.store.has_tombstone(id).await {
                self.store.discard_buffered_progress(id).await;
                self.store.clear_tombstone(id).await?;
                info!(chain_id = %id, step = step_idx, "Chain superseded mid-execution; aborting");
                return Ok((self.report(id, ChainState::Aborted, steps_completed), false));
            }

            if self.shutdown_requested.load(Ordering::SeqCst) || Instant::now() >= deadline {
                return self.suspend(id, progress, steps_completed).await.map(|r| (r, true));
            }

            let Some(step) = chain.steps.get(step_idx as usize) else {
                warn!(chain_id = %id, step = step_idx, "Progress lists more steps than the definition");
                break;
            };

            let outcome = if step.is_parallel() {
                self.run_parallel_step(id, step, step_idx, &mut progress, deadline).await
            } else {
                self.run_sequential_step(id, step, step_idx, deadline).await
            };

            match outcome {
                StepOutcome::Completed => {
                    progress = progress.with_completed_step(step_idx);
                    steps_completed += 1;
                    self.store.save_chain_progress(progress.clone()).await?;
                    debug!(
                        chain_id = %id,
                        step = step_idx,
                        state = %ChainState::StepComplete,
                        pct = progress.completion_percentage(),
                        "Step complete"
                    );
                }
                StepOutcome::Failed => {
                    progress = progress.with_failure(step_idx);
                    if progress.has_exceeded_retries() {
                        warn!(
                            chain_id = %id,
                            retries = progress.retry_count,
                            "Retries exhausted; chain failed permanently"
                        );
                        self.store.remove_chain(id).await?;
                        return Ok((self.report(id, ChainState::Failed, steps_completed), false));
                    }
                    self.store.save_chain_progress(progress).await?;
                    self.store.requeue(id).await?;
                    debug!(chain_id = %id, step = step_idx, "Step failed; will retry on a later activation");
                    return Ok((self.report(id, ChainState::Suspended, steps_completed), false));
                }
                StepOutcome::DeadlineHit => {
                    // Per-task successes are already recorded in `progress`
                    return self.suspend(id, progress, steps_completed).await.map(|r| (r, true));
                }
            }
        }

        self.store.remove_chain(id).await?;
        info!(chain_id = %id, steps_completed, "Chain complete");
        Ok((self.report(id, ChainState::Completed, steps_completed), false))
    }

    /// Persist progress, re-enqueue, and report suspension
    async fn suspend(
        &self,
        id: &str,
        progress: ChainProgress,
        steps_completed: u32,
    ) -> Result<ChainReport, ExecError> {
        self.store.save_chain_progress(progress).await?;
        self.store.requeue(id).await?;
        info!(chain_id = %id, "Budget exhausted; suspended for continuation");
        Ok(self.report(id, ChainState::Suspended, steps_completed))
    }

    /// Run a sequential step's single task
    async fn run_sequential_step(&self, id: &str, step: &Step, step_idx: u32, deadline: Instant) -> StepOutcome {
        let Some(task) = step.tasks.first() else {
            // Empty step: trivially complete
            return StepOutcome::Completed;
        };
        match self.run_task(task, deadline).await {
            TaskRun::Done(WorkerOutcome::Success { .. }) => StepOutcome::Completed,
            TaskRun::Done(WorkerOutcome::Failure { reason }) => {
                warn!(chain_id = %id, step = step_idx, %reason, "Task failed");
                StepOutcome::Failed
            }
            TaskRun::Deadline => StepOutcome::DeadlineHit,
        }
    }

    /// Run only the not-yet-completed tasks of a parallel step
    ///
    /// Each success is recorded immediately, so a deadline or a failing
    /// sibling never discards work that already succeeded. Tasks have no
    /// required relative order.
    async fn run_parallel_step(
        &self,
        id: &str,
        step: &Step,
        step_idx: u32,
        progress: &mut ChainProgress,
        deadline: Instant,
    ) -> StepOutcome {
        let mut pending = FuturesUnordered::new();
        for (task_idx, task) in step.tasks.iter().enumerate() {
            let task_idx = task_idx as u32;
            if progress.is_task_in_step_completed(step_idx, task_idx) {
                continue;
            }
            pending.push(async move { (task_idx, self.run_task(task, deadline).await) });
        }

        let mut failed = false;
        while let Some((task_idx, run)) = pending.next().await {
            match run {
                TaskRun::Done(WorkerOutcome::Success { .. }) => {
                    *progress = progress.clone().with_completed_task_in_step(step_idx, task_idx);
                }
                TaskRun::Done(WorkerOutcome::Failure { reason }) => {
                    warn!(chain_id = %id, step = step_idx, task = task_idx, %reason, "Parallel task failed");
                    failed = true;
                }
                TaskRun::Deadline => {
                    return StepOutcome::DeadlineHit;
                }
            }
        }

        if failed { StepOutcome::Failed } else { StepOutcome::Completed }
    }

    /// Execute one task, racing the activation deadline
    async fn run_task(&self, task: &Task, deadline: Instant) -> TaskRun {
        let Some(worker) = self.resolver.resolve(&task.worker) else {
            warn!(worker = %task.worker, "No worker registered; treating as task failure");
            return TaskRun::Done(WorkerOutcome::failed(format!("worker not found: {}", task.worker)));
        };
        tokio::select! {
            outcome = worker.execute(&task.input, task.constraints.as_ref()) => TaskRun::Done(outcome),
            _ = sleep_until(deadline) => TaskRun::Deadline,
        }
    }

    fn report(&self, id: &str, state: ChainState, steps_completed: u32) -> ChainReport {
        ChainReport {
            chain_id: id.to_string(),
            state,
            steps_completed,
        }
    }

    /// Ask the host for a future activation
    ///
    /// Called only after the flush, so a failing hook leaves durable state
    /// intact. Without a registered hook the request is logged and dropped.
    fn request_continuation(&self, pending: u64) -> bool {
        match &self.continuation {
            Some(hook) => match hook.request_continuation() {
                Ok(()) => {
                    debug!(pending, "Continuation requested");
                    true
                }
                Err(e) => {
                    error!(error = %e, "Continuation hook failed; state remains persisted");
                    false
                }
            },
            None => {
                warn!(pending, "Work remains but no continuation scheduler is registered; nothing will auto-resume it");
                false
            }
        }
    }

    /// Request cooperative shutdown without blocking
    ///
    /// Idempotent: repeat requests are no-ops. The final flush is
    /// dispatched asynchronously; callers that need to await it use
    /// [`Self::shutdown_and_wait`]. The next fresh activation resets the
    /// request automatically.
    pub fn shutdown(&self) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already requested");
            return;
        }
        info!("Shutdown requested; dispatching final flush");
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.flush_progress().await {
                error!(error = %e, "Final flush failed");
            }
        });
    }

    /// Request cooperative shutdown and await the final flush
    ///
    /// Waits at most the configured grace period; the flush attempt itself
    /// runs on its own task and is never cancelled, so even an expired
    /// grace period leaves one non-cancellable attempt in flight.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        let store = Arc::clone(&self.store);
        let flush = tokio::spawn(async move { store.flush_progress().await });

        match timeout(self.config.shutdown_grace(), flush).await {
            Ok(Ok(Ok(()))) => info!("Shutdown complete; final flush durable"),
            Ok(Ok(Err(e))) => error!(error = %e, "Final flush failed during shutdown"),
            Ok(Err(e)) => error!(error = %e, "Final flush task panicked"),
            Err(_) => warn!("Shutdown grace period elapsed; flush continues in background"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Worker;
    use crate::worker::mock::{MapResolver, MockWorker};
    use async_trait::async_trait;
    use chainstore::{Chain, StoreConfig};
    use serde_json::{Value, json};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Worker that sleeps before succeeding
    struct SlowWorker {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl SlowWorker {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Worker for SlowWorker {
        async fn execute(&self, _input: &Value, _constraints: Option<&Value>) -> WorkerOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            WorkerOutcome::ok()
        }
    }

    /// Worker that fails the first time it sees a given input, then succeeds
    struct FlakyOnce {
        seen: Mutex<HashSet<String>>,
    }

    impl FlakyOnce {
        fn new() -> Self {
            Self {
                seen: Mutex::new(HashSet::new()),
            }
        }
    }

    #[async_trait]
    impl Worker for FlakyOnce {
        async fn execute(&self, input: &Value, _constraints: Option<&Value>) -> WorkerOutcome {
            let key = input.to_string();
            if self.seen.lock().unwrap().insert(key) {
                WorkerOutcome::failed("transient")
            } else {
                WorkerOutcome::ok()
            }
        }
    }

    /// Continuation scheduler that counts requests
    #[derive(Default)]
    struct CountingScheduler {
        requests: AtomicUsize,
    }

    impl CountingScheduler {
        fn requests(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    impl ContinuationScheduler for CountingScheduler {
        fn request_continuation(&self) -> Result<(), ExecError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn open_store(dir: &std::path::Path) -> Arc<ChainStore> {
        Arc::new(ChainStore::open(dir, StoreConfig::default()).await.unwrap())
    }

    fn sequential_chain(id: &str, steps: usize, worker: &str) -> Chain {
        Chain::new(
            id,
            (0..steps)
                .map(|i| Step::single(Task::new(worker, json!({"step": i}))))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_runs_chain_to_completion() {
        let temp = TempDir::new().unwrap();
        let store = open_store(temp.path()).await;
        let worker = Arc::new(MockWorker::succeeding());
        let resolver = Arc::new(MapResolver::default().with("w", worker.clone()));

        store.enqueue_chain(sequential_chain("c1", 3, "w"), 3).await.unwrap();

        let exec = ChainExecutor::new(Arc::clone(&store), resolver, ExecutorConfig::default());
        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();

        assert_eq!(report.chains.len(), 1);
        assert_eq!(report.chains[0].state, ChainState::Completed);
        assert_eq!(report.chains[0].steps_completed, 3);
        assert!(!report.continuation_requested);
        assert_eq!(worker.calls(), 3);

        // Completion removes definition and progress
        assert_eq!(store.load_chain_definition("c1").await.unwrap(), None);
        assert_eq!(store.load_chain_progress("c1").await.unwrap(), None);
        assert_eq!(store.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_processes_chains_in_enqueue_order() {
        let temp = TempDir::new().unwrap();
        let store = open_store(temp.path()).await;
        let resolver = Arc::new(MapResolver::default().with("w", Arc::new(MockWorker::succeeding())));

        for i in 0..3 {
            store
                .enqueue_chain(sequential_chain(&format!("c{i}"), 1, "w"), 3)
                .await
                .unwrap();
        }

        let exec = ChainExecutor::new(Arc::clone(&store), resolver, ExecutorConfig::default());
        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();

        let ids: Vec<&str> = report.chains.iter().map(|c| c.chain_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2"]);
    }

    #[tokio::test]
    async fn test_suspends_on_budget_and_resumes() {
        let temp = TempDir::new().unwrap();
        let store = open_store(temp.path()).await;
        let worker = Arc::new(SlowWorker::new(Duration::from_millis(60)));
        let resolver = Arc::new(MapResolver::default().with("slow", worker.clone()));
        let scheduler = Arc::new(CountingScheduler::default());

        store.enqueue_chain(sequential_chain("c1", 3, "slow"), 3).await.unwrap();

        let exec = ChainExecutor::new(Arc::clone(&store), resolver, ExecutorConfig::default())
            .with_continuation_scheduler(scheduler.clone());

        // Budget of roughly 85ms covers one 60ms step, not two
        let report = exec.run_activation(Duration::from_millis(150)).await.unwrap();
        assert_eq!(report.chains.len(), 1);
        assert_eq!(report.chains[0].state, ChainState::Suspended);
        assert!(report.continuation_requested);
        assert_eq!(scheduler.requests(), 1);

        // Progress is durable, not just buffered
        let progress = store.load_chain_progress("c1").await.unwrap().unwrap();
        assert!(!progress.completed_steps.is_empty());
        assert_eq!(store.queue_len().await, 1);

        // A later activation with a generous ceiling finishes the chain
        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();
        assert_eq!(report.chains[0].state, ChainState::Completed);
        assert_eq!(store.queue_len().await, 0);
        // The interrupted step reran; completed steps did not
        assert!(worker.calls() >= 3);
    }

    #[tokio::test]
    async fn test_parallel_step_retries_only_failed_tasks() {
        let temp = TempDir::new().unwrap();
        let store = open_store(temp.path()).await;
        let steady = Arc::new(MockWorker::succeeding());
        let flaky = Arc::new(FlakyOnce::new());
        let resolver = Arc::new(
            MapResolver::default()
                .with("steady", steady.clone())
                .with("flaky", flaky.clone() as Arc<dyn Worker>),
        );

        // 4-task parallel step: tasks 0 and 2 succeed, 1 and 3 fail once
        let chain = Chain::new(
            "c1",
            vec![Step::parallel(vec![
                Task::new("steady", json!({"task": 0})),
                Task::new("flaky", json!({"task": 1})),
                Task::new("steady", json!({"task": 2})),
                Task::new("flaky", json!({"task": 3})),
            ])],
        );
        store.enqueue_chain(chain, 3).await.unwrap();

        let exec = ChainExecutor::new(Arc::clone(&store), resolver, ExecutorConfig::default());

        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();
        assert_eq!(report.chains[0].state, ChainState::Suspended);

        let progress = store.load_chain_progress("c1").await.unwrap().unwrap();
        assert_eq!(progress.retry_count, 1);
        assert!(progress.is_task_in_step_completed(0, 0));
        assert!(!progress.is_task_in_step_completed(0, 1));
        assert!(progress.is_task_in_step_completed(0, 2));
        assert!(!progress.is_task_in_step_completed(0, 3));

        // Retry runs only tasks 1 and 3
        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();
        assert_eq!(report.chains[0].state, ChainState::Completed);
        assert_eq!(steady.calls(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails_permanently() {
        let temp = TempDir::new().unwrap();
        let store = open_store(temp.path()).await;
        let resolver = Arc::new(MapResolver::default().with("bad", Arc::new(MockWorker::failing("boom"))));

        store.enqueue_chain(sequential_chain("c1", 1, "bad"), 1).await.unwrap();

        let exec = ChainExecutor::new(Arc::clone(&store), resolver, ExecutorConfig::default());
        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();

        assert_eq!(report.chains[0].state, ChainState::Failed);
        assert_eq!(store.load_chain_definition("c1").await.unwrap(), None);
        assert_eq!(store.load_chain_progress("c1").await.unwrap(), None);
        assert_eq!(store.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_retryable_failure_waits_for_later_activation() {
        let temp = TempDir::new().unwrap();
        let store = open_store(temp.path()).await;
        let flaky = Arc::new(FlakyOnce::new());
        let resolver = Arc::new(MapResolver::default().with("flaky", flaky as Arc<dyn Worker>));

        store.enqueue_chain(sequential_chain("c1", 1, "flaky"), 3).await.unwrap();

        let exec = ChainExecutor::new(Arc::clone(&store), resolver, ExecutorConfig::default());

        // The chain fails once and must not retry within the same activation
        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();
        assert_eq!(report.chains.len(), 1);
        assert_eq!(report.chains[0].state, ChainState::Suspended);
        assert_eq!(store.queue_len().await, 1);

        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();
        assert_eq!(report.chains[0].state, ChainState::Completed);
    }

    #[tokio::test]
    async fn test_tombstoned_chain_skipped_at_pickup() {
        let temp = TempDir::new().unwrap();
        let store = open_store(temp.path()).await;
        let worker = Arc::new(MockWorker::succeeding());
        let resolver = Arc::new(MapResolver::default().with("w", worker.clone()));

        store.enqueue_chain(sequential_chain("c1", 2, "w"), 3).await.unwrap();
        store.tombstone("c1").await.unwrap();

        let exec = ChainExecutor::new(Arc::clone(&store), resolver, ExecutorConfig::default());
        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();

        assert_eq!(report.chains[0].state, ChainState::Aborted);
        assert_eq!(worker.calls(), 0);
        assert!(!store.has_tombstone("c1").await);
    }

    #[tokio::test]
    async fn test_unknown_worker_is_task_failure() {
        let temp = TempDir::new().unwrap();
        let store = open_store(temp.path()).await;
        let resolver = Arc::new(MapResolver::default());

        store.enqueue_chain(sequential_chain("c1", 1, "missing"), 1).await.unwrap();

        let exec = ChainExecutor::new(Arc::clone(&store), resolver, ExecutorConfig::default());
        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();
        assert_eq!(report.chains[0].state, ChainState::Failed);
    }

    #[tokio::test]
    async fn test_no_scheduler_leaves_state_persisted() {
        let temp = TempDir::new().unwrap();
        let store = open_store(temp.path()).await;
        let resolver = Arc::new(MapResolver::default().with("slow", Arc::new(SlowWorker::new(Duration::from_millis(60)))));

        store.enqueue_chain(sequential_chain("c1", 3, "slow"), 3).await.unwrap();

        let exec = ChainExecutor::new(Arc::clone(&store), resolver, ExecutorConfig::default());
        let report = exec.run_activation(Duration::from_millis(150)).await.unwrap();

        // Suspension persisted but nothing will auto-resume it
        assert_eq!(report.chains[0].state, ChainState::Suspended);
        assert!(!report.continuation_requested);
        assert!(store.load_chain_progress("c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_resets() {
        let temp = TempDir::new().unwrap();
        let store = open_store(temp.path()).await;
        let resolver = Arc::new(MapResolver::default().with("w", Arc::new(MockWorker::succeeding())));

        let exec = ChainExecutor::new(Arc::clone(&store), resolver, ExecutorConfig::default());
        exec.shutdown();
        exec.shutdown();
        exec.shutdown_and_wait().await;

        // A fresh activation resets the request and still does work
        store.enqueue_chain(sequential_chain("c1", 1, "w"), 3).await.unwrap();
        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();
        assert_eq!(report.chains[0].state, ChainState::Completed);
    }

    #[tokio::test]
    async fn test_adaptive_margin_updates_from_persist_cycle() {
        let temp = TempDir::new().unwrap();
        let store = open_store(temp.path()).await;
        let resolver = Arc::new(MapResolver::default().with("w", Arc::new(MockWorker::succeeding())));

        store.enqueue_chain(sequential_chain("c1", 1, "w"), 3).await.unwrap();

        let exec = ChainExecutor::new(Arc::clone(&store), resolver, ExecutorConfig::default());
        let report = exec.run_activation(Duration::from_secs(10)).await.unwrap();

        // The measured flush duration feeds the next activation's margin
        assert_eq!(*exec.last_persist.lock().unwrap(), report.persist_duration);
    }
}
