//! Adaptive Task Executor.
//!
//! One scheduling loop claims ready tasks and dispatches each into its own
//! pipeline, then sleeps for an interval chosen from the current load level.
//!
//! ```text
//!   ┌──────────── cycle ─────────────┐
//!   │ reap finished pipelines        │
//!   │ claim ≤ min(free slots, batch) │──► spawn pipeline per task
//!   │ record busy time, classify     │        │
//!   └────────────────────────────────┘        ▼
//!        sleep(interval[level])         worker.execute (timeout, panic-isolated)
//!                                             │
//!                                        write result
//!                                             │ completed
//!                                             ▼
//!                                 goal increment ─► aggregation trigger
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::load::{LoadLevel, LoadTracker};
use crate::config::ExecutorConfig;
use crate::deliverable::AggregationTrigger;
use crate::goal::apply_task_progress;
use crate::store::{SharedTaskStore, WorkspaceScope};
use crate::task::{FailureCategory, Task, TaskPayload, TaskStatus};
use crate::worker::SharedWorker;

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStatus {
    pub load_level: LoadLevel,
    pub loop_count: u64,
    pub avg_loop_ms: f64,
    pub in_flight: usize,
    pub dispatched_total: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub poll_interval_ms: u64,
    pub last_error: Option<String>,
}

impl Default for ExecutorStatus {
    fn default() -> Self {
        Self {
            load_level: LoadLevel::Low,
            loop_count: 0,
            avg_loop_ms: 0.0,
            in_flight: 0,
            dispatched_total: 0,
            completed_total: 0,
            failed_total: 0,
            poll_interval_ms: 0,
            last_error: None,
        }
    }
}

/// What one scheduling cycle did.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub claimed: usize,
    pub in_flight: usize,
    pub load_level: LoadLevel,
    pub sleep: Duration,
}

/// How a task's pipeline ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Failed(FailureCategory),
    /// Result could not be persisted; the task stays claimed until recovery
    Unrecorded,
    /// The claim was re-queued or taken over before the result was written
    Superseded,
}

struct LoopState {
    tracker: LoadTracker,
    in_flight: JoinSet<PipelineOutcome>,
}

/// Everything a pipeline needs, shared with spawned tasks.
struct PipelineContext {
    store: SharedTaskStore,
    worker: SharedWorker,
    trigger: Arc<AggregationTrigger>,
    task_timeout: Duration,
    status: Arc<RwLock<ExecutorStatus>>,
}

/// Aborts the wrapped task when dropped, so abandoned pipelines take their
/// worker call with them.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct AdaptiveExecutor {
    config: ExecutorConfig,
    ctx: Arc<PipelineContext>,
    state: Mutex<LoopState>,
    status: Arc<RwLock<ExecutorStatus>>,
}

impl AdaptiveExecutor {
    pub fn new(
        config: ExecutorConfig,
        store: SharedTaskStore,
        worker: SharedWorker,
        trigger: Arc<AggregationTrigger>,
    ) -> Self {
        let status = Arc::new(RwLock::new(ExecutorStatus::default()));
        let ctx = Arc::new(PipelineContext {
            store,
            worker,
            trigger,
            task_timeout: config.task_timeout(),
            status: Arc::clone(&status),
        });
        let state = Mutex::new(LoopState {
            tracker: LoadTracker::new(config.ema_alpha, config.thresholds.clone()),
            in_flight: JoinSet::new(),
        });

        Self {
            config,
            ctx,
            state,
            status,
        }
    }

    pub async fn status(&self) -> ExecutorStatus {
        self.status.read().await.clone()
    }

    /// Run the scheduling loop until cancelled, then drain in-flight work.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            max_concurrency = self.config.max_concurrency,
            batch_size = self.config.batch_size,
            "Adaptive executor started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let report = self.tick().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(report.sleep) => {}
            }
        }

        tracing::info!("Shutdown requested, executor stopped claiming");
        self.drain().await;
        tracing::info!("Adaptive executor stopped");
    }

    /// One scheduling cycle. Never fails; store errors are logged and retried next cycle.
    pub async fn tick(&self) -> TickReport {
        let started = Instant::now();
        let mut state = self.state.lock().await;

        while let Some(joined) = state.in_flight.try_join_next() {
            log_join(joined);
        }

        let capacity = self.config.max_concurrency;
        let free = capacity.saturating_sub(state.in_flight.len());
        let limit = free.min(self.config.batch_size);

        let mut claimed = 0;
        let mut claim_error = None;
        if limit > 0 {
            match self
                .ctx
                .store
                .claim_ready_tasks(WorkspaceScope::All, &self.config.worker_id, limit)
                .await
            {
                Ok(tasks) => {
                    claimed = tasks.len();
                    for task in tasks {
                        tracing::debug!(task_id = %task.id, name = %task.name, "Dispatching task");
                        state
                            .in_flight
                            .spawn(run_pipeline(Arc::clone(&self.ctx), task));
                    }
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!("Failed to claim ready tasks: {}", e);
                    } else {
                        tracing::error!("Failed to claim ready tasks: {}", e);
                    }
                    claim_error = Some(e.to_string());
                }
            }
        }

        // Busy time only; the sleep this loop picks must not feed back into the level
        let busy = started.elapsed();
        let avg_loop_ms = state.tracker.record(busy);
        let in_flight = state.in_flight.len();
        let load_level = state.tracker.level(in_flight, capacity);

        let sleep = if claimed == 0 && in_flight == 0 {
            self.config.idle_interval()
        } else {
            self.config.intervals.get(load_level)
        };

        {
            let mut status = self.status.write().await;
            if status.load_level != load_level {
                tracing::info!(from = %status.load_level, to = %load_level, avg_loop_ms, in_flight, "Load level changed");
            }
            status.load_level = load_level;
            status.loop_count += 1;
            status.avg_loop_ms = avg_loop_ms;
            status.in_flight = in_flight;
            status.dispatched_total += claimed as u64;
            status.poll_interval_ms = sleep.as_millis() as u64;
            if claim_error.is_some() {
                status.last_error = claim_error;
            }
        }

        TickReport {
            claimed,
            in_flight,
            load_level,
            sleep,
        }
    }

    /// Wait up to the shutdown grace for in-flight pipelines, then abort the rest.
    ///
    /// Aborted tasks stay `in_progress` and are picked up by recovery.
    pub async fn drain(&self) {
        let mut state = self.state.lock().await;
        if state.in_flight.is_empty() {
            return;
        }

        let grace = self.config.shutdown_grace();
        tracing::info!(
            count = state.in_flight.len(),
            grace_secs = grace.as_secs(),
            "Waiting for in-flight tasks to complete"
        );

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = state.in_flight.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                count = state.in_flight.len(),
                "Grace period elapsed, aborting in-flight tasks"
            );
            state.in_flight.abort_all();
            while state.in_flight.join_next().await.is_some() {}
        }

        self.status.write().await.in_flight = 0;
    }
}

fn log_join(joined: Result<PipelineOutcome, JoinError>) {
    match joined {
        Ok(PipelineOutcome::Unrecorded) => {
            tracing::warn!("Task pipeline finished without recording its result")
        }
        Ok(_) => {}
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!("Task pipeline panicked: {}", e),
    }
}

async fn run_pipeline(ctx: Arc<PipelineContext>, mut task: Task) -> PipelineOutcome {
    let task_id = task.id;
    let Some(claim_id) = task.claim_id else {
        tracing::error!(%task_id, "Claimed task carries no claim token, not executing");
        return PipelineOutcome::Unrecorded;
    };
    let timeout = ctx.task_timeout.saturating_mul(task.timeout_scale());

    let worker = Arc::clone(&ctx.worker);
    let input = task.clone();
    let mut execution = AbortOnDrop(tokio::spawn(async move { worker.execute(input).await }));

    let (status, payload, failure) = match tokio::time::timeout(timeout, &mut execution.0).await {
        Err(_) => {
            tracing::warn!(%task_id, timeout_secs = timeout.as_secs(), "Task timed out");
            failed(FailureCategory::Timeout, format!("execution exceeded {:?}", timeout))
        }
        Ok(Err(join_error)) => {
            tracing::error!(%task_id, "Worker panicked: {}", join_error);
            failed(
                FailureCategory::WorkerCrash,
                format!("worker panicked: {}", join_error),
            )
        }
        Ok(Ok(Err(worker_error))) => {
            tracing::warn!(%task_id, "Worker error: {}", worker_error);
            failed(FailureCategory::WorkerCrash, worker_error.to_string())
        }
        Ok(Ok(Ok(result))) if !result.success => {
            let error = result
                .error
                .unwrap_or_else(|| "worker reported an unsuccessful result".to_string());
            tracing::info!(%task_id, "Task result rejected: {}", error);
            failed(FailureCategory::ValidationError, error)
        }
        Ok(Ok(Ok(result))) => (TaskStatus::Completed, result.payload, None),
    };

    match ctx
        .store
        .write_task_result(task_id, claim_id, status, payload.clone(), failure)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(%task_id, "Claim was taken over before the result landed, discarding it");
            return PipelineOutcome::Superseded;
        }
        Err(e) => {
            tracing::error!(%task_id, "Failed to record task result: {}", e);
            ctx.status.write().await.last_error = Some(e.to_string());
            return PipelineOutcome::Unrecorded;
        }
    }

    match failure {
        Some(category) => {
            ctx.status.write().await.failed_total += 1;
            PipelineOutcome::Failed(category)
        }
        None => {
            ctx.status.write().await.completed_total += 1;
            tracing::info!(%task_id, name = %task.name, "Task completed");

            task.status = TaskStatus::Completed;
            task.claim_id = None;
            task.result = payload;
            on_completed(&ctx, &task).await;
            PipelineOutcome::Completed
        }
    }
}

fn failed(
    category: FailureCategory,
    error: String,
) -> (TaskStatus, TaskPayload, Option<FailureCategory>) {
    (
        TaskStatus::Failed,
        TaskPayload::failure(category, error),
        Some(category),
    )
}

/// Goal increment first so the deliverable sees up-to-date goal values.
async fn on_completed(ctx: &PipelineContext, task: &Task) {
    let applied = apply_task_progress(ctx.store.as_ref(), task).await;
    if !applied.is_empty() {
        tracing::debug!(task_id = %task.id, goals = applied.len(), "Applied goal increments");
    }
    ctx.trigger.on_task_completed(task).await;
}
