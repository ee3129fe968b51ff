//! Recovery Coordinator.
//!
//! Runs on its own slow cadence and handles three kinds of stuck work:
//! - `in_progress` claims that outlived both `stale_after` and the task's own
//!   execution budget (presumed crashed worker)
//! - `failed` tasks that have not been escalated yet
//! - `pending` tasks whose dependencies can never complete, or have not
//!   completed within `starvation_after`
//!
//! The retry counter is the only thing standing between a flaky task and an
//! infinite retry loop, so every re-queue strictly increments it and reaching
//! `max_retries` always escalates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::strategy::{broaden_context, RecoveryAction};
use crate::config::RecoveryConfig;
use crate::store::{SharedTaskStore, StoreError};
use crate::task::{FailureCategory, Task, TaskId, TaskStatus, WorkspaceId};

/// Slack on top of an execution budget for the executor to record its result.
const CLAIM_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryStatus {
    pub cycles: u64,
    pub requeued: u64,
    pub broadened: u64,
    pub escalated: u64,
    pub starved: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Tasks touched by one recovery cycle.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub requeued: Vec<TaskId>,
    pub broadened: Vec<TaskId>,
    pub escalated: Vec<TaskId>,
    /// Escalated as `dependency_blocked`; also listed in `escalated`
    pub starved: Vec<TaskId>,
    pub failed_workspaces: usize,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.broadened.is_empty() && self.escalated.is_empty()
    }
}

pub struct RecoveryCoordinator {
    store: SharedTaskStore,
    config: RecoveryConfig,
    /// Base execution timeout the executor scales per task
    task_timeout: Duration,
    status: RwLock<RecoveryStatus>,
    cycle_lock: Mutex<()>,
}

impl RecoveryCoordinator {
    pub fn new(store: SharedTaskStore, config: RecoveryConfig, task_timeout: Duration) -> Self {
        Self {
            store,
            config,
            task_timeout,
            status: RwLock::new(RecoveryStatus::default()),
            cycle_lock: Mutex::new(()),
        }
    }

    pub async fn status(&self) -> RecoveryStatus {
        self.status.read().await.clone()
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.interval_secs,
            max_retries = self.config.max_retries,
            "Recovery coordinator started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.run_now() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval()) => {}
            }
        }
        tracing::info!("Recovery coordinator stopped");
    }

    /// One cycle, immediately.
    pub async fn run_now(&self) -> RecoveryReport {
        self.run_cycle_at(Utc::now()).await
    }

    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> RecoveryReport {
        let _guard = self.cycle_lock.lock().await;
        let mut report = RecoveryReport::default();

        match self.store.list_workspaces().await {
            Ok(workspaces) => {
                for workspace_id in workspaces {
                    if let Err(e) = self.recover_workspace(workspace_id, now, &mut report).await {
                        report.failed_workspaces += 1;
                        if e.is_transient() {
                            tracing::warn!(%workspace_id, "Recovery skipped workspace: {}", e);
                        } else {
                            tracing::error!(%workspace_id, "Recovery skipped workspace: {}", e);
                        }
                        self.status.write().await.last_error = Some(e.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Recovery could not list workspaces: {}", e);
                self.status.write().await.last_error = Some(e.to_string());
            }
        }

        {
            let mut status = self.status.write().await;
            status.cycles += 1;
            status.last_cycle_at = Some(now);
            status.requeued += report.requeued.len() as u64;
            status.broadened += report.broadened.len() as u64;
            status.escalated += report.escalated.len() as u64;
            status.starved += report.starved.len() as u64;
        }

        if !report.is_empty() {
            tracing::info!(
                requeued = report.requeued.len(),
                broadened = report.broadened.len(),
                escalated = report.escalated.len(),
                starved = report.starved.len(),
                "Recovery cycle complete"
            );
        }
        report
    }

    async fn recover_workspace(
        &self,
        workspace_id: WorkspaceId,
        now: DateTime<Utc>,
        report: &mut RecoveryReport,
    ) -> Result<(), StoreError> {
        let tasks = self.store.list_tasks(workspace_id, None).await?;
        let by_id: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();

        for task in &tasks {
            let result = match task.status {
                TaskStatus::InProgress => {
                    if self.claim_is_stale(task, now) {
                        tracing::warn!(
                            task_id = %task.id,
                            worker = ?task.assigned_worker,
                            "Claim went stale, presuming worker crashed"
                        );
                        self.recover(task, FailureCategory::WorkerCrash, report).await
                    } else {
                        Ok(())
                    }
                }
                TaskStatus::Failed if !task.escalated => {
                    let category = task.failure.unwrap_or(FailureCategory::WorkerCrash);
                    self.recover(task, category, report).await
                }
                TaskStatus::Pending if !task.depends_on.is_empty() => {
                    match self.starvation_reason(task, &by_id, now) {
                        Some(reason) => self.escalate_starved(task, &reason, report).await,
                        None => Ok(()),
                    }
                }
                _ => Ok(()),
            };

            // One task's store error never aborts the rest of the workspace
            if let Err(e) = result {
                tracing::warn!(task_id = %task.id, "Recovery action failed: {}", e);
                self.status.write().await.last_error = Some(e.to_string());
            }
        }
        Ok(())
    }

    /// A claim is stale once it outlives `stale_after` and the task's own
    /// execution budget plus grace, whichever is later. Before that the
    /// executor may still be running it.
    fn claim_is_stale(&self, task: &Task, now: DateTime<Utc>) -> bool {
        let claimed_at = task.started_at.unwrap_or(task.updated_at);
        let Ok(held) = now.signed_duration_since(claimed_at).to_std() else {
            return false;
        };
        held >= self.claim_expiry(task)
    }

    fn claim_expiry(&self, task: &Task) -> Duration {
        let budget = self
            .task_timeout
            .saturating_mul(task.timeout_scale())
            .saturating_add(CLAIM_GRACE);
        budget.max(Duration::from_secs(self.config.stale_after_secs))
    }

    async fn recover(
        &self,
        task: &Task,
        category: FailureCategory,
        report: &mut RecoveryReport,
    ) -> Result<(), StoreError> {
        let action =
            self.config
                .strategies
                .select(category, task.retry_count, self.config.max_retries);
        let next_retry = task.retry_count + 1;

        match action {
            RecoveryAction::Requeue => {
                self.store
                    .requeue_task(task.id, next_retry, task.context.clone())
                    .await?;
                tracing::info!(task_id = %task.id, %category, retry = next_retry, "Task re-queued");
                report.requeued.push(task.id);
            }
            RecoveryAction::RequeueBroadened => {
                let context =
                    broaden_context(&task.context, next_retry, self.config.max_timeout_scale);
                self.store.requeue_task(task.id, next_retry, context).await?;
                tracing::info!(
                    task_id = %task.id,
                    %category,
                    retry = next_retry,
                    "Task re-queued with broadened parameters"
                );
                report.requeued.push(task.id);
                report.broadened.push(task.id);
            }
            RecoveryAction::Escalate => {
                let reason = if task.retry_count >= self.config.max_retries {
                    format!(
                        "{} after {} retries, retry ceiling reached",
                        category, task.retry_count
                    )
                } else {
                    format!("{} is not retried", category)
                };
                self.store.escalate_task(task.id, category, &reason).await?;
                tracing::warn!(task_id = %task.id, %category, "Task escalated: {}", reason);
                report.escalated.push(task.id);
            }
        }
        Ok(())
    }

    /// Why a pending task can no longer make progress, if it can't.
    fn starvation_reason(
        &self,
        task: &Task,
        by_id: &HashMap<TaskId, &Task>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let mut unmet = false;
        for dep_id in &task.depends_on {
            match by_id.get(dep_id) {
                None => return Some(format!("dependency {} does not exist", dep_id)),
                Some(dep) if dep.is_terminal_failure() => {
                    return Some(format!("dependency {} failed terminally", dep_id))
                }
                Some(dep) if dep.status != TaskStatus::Completed => unmet = true,
                Some(_) => {}
            }
        }

        if unmet && now.signed_duration_since(task.created_at) >= self.config.starvation_after() {
            return Some(format!(
                "dependencies unmet for more than {}s",
                self.config.starvation_after_secs
            ));
        }
        None
    }

    async fn escalate_starved(
        &self,
        task: &Task,
        reason: &str,
        report: &mut RecoveryReport,
    ) -> Result<(), StoreError> {
        self.store
            .escalate_task(task.id, FailureCategory::DependencyBlocked, reason)
            .await?;
        tracing::warn!(task_id = %task.id, "Starved task escalated: {}", reason);
        report.escalated.push(task.id);
        report.starved.push(task.id);
        Ok(())
    }
}
