//! Goal Health Monitor.
//!
//! Periodically re-derives each due goal's workspace health from store records
//! and, for healthy workspaces whose goal has stalled, asks the task-generation
//! collaborator for more work. Proposed tasks are deduplicated by semantic hash
//! before insertion.
//!
//! ```text
//!   due goal ──► target met? ──yes──► skip
//!                   │ no
//!                   ▼
//!             workspace healthy? ──no──► skip (abandoned)
//!                   │ yes
//!                   ▼
//!             open tasks for goal? ──yes──► skip (progressing)
//!                   │ no
//!                   ▼
//!             propose_tasks ─► dedup ─► insert non-duplicates
//!
//!   every evaluated goal: last_validation_at = now
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use super::{Goal, GoalId, WorkspaceHealth};
use crate::config::MonitorConfig;
use crate::reasoning::{CollaboratorError, SharedTaskGenerator, TaskSummary, WorkspaceContext};
use crate::store::{NewTask, SharedTaskStore, StoreError};
use crate::task::{Task, WorkspaceId};

/// Result of evaluating one goal.
#[derive(Debug, Clone, PartialEq)]
pub enum GoalOutcome {
    TargetReached,
    UnhealthyWorkspace,
    /// Goal already has pending or in-progress tasks
    Progressing { open_tasks: usize },
    AboveStallThreshold,
    Generated {
        proposed: usize,
        inserted: usize,
        duplicates: usize,
    },
    GenerationFailed(String),
}

#[derive(Debug, Clone)]
pub struct GoalEvaluation {
    pub goal_id: GoalId,
    pub workspace_id: WorkspaceId,
    pub outcome: GoalOutcome,
}

/// Summary of one monitor cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub evaluations: Vec<GoalEvaluation>,
    /// Workspaces whose records could not be read this cycle
    pub failed_workspaces: usize,
    /// Sleep before the next cycle, derived from active goals' frequencies
    pub next_interval: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStatus {
    pub cycles: u64,
    pub goals_evaluated: u64,
    pub generations: u64,
    pub tasks_inserted: u64,
    pub duplicates_skipped: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct GoalHealthMonitor {
    store: SharedTaskStore,
    generator: SharedTaskGenerator,
    config: MonitorConfig,
    collaborator_timeout: Duration,
    status: RwLock<MonitorStatus>,
    /// Keeps manual and periodic cycles from interleaving
    cycle_lock: Mutex<()>,
    wake: Notify,
}

impl GoalHealthMonitor {
    pub fn new(
        store: SharedTaskStore,
        generator: SharedTaskGenerator,
        config: MonitorConfig,
        collaborator_timeout: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            config,
            collaborator_timeout,
            status: RwLock::new(MonitorStatus::default()),
            cycle_lock: Mutex::new(()),
            wake: Notify::new(),
        }
    }

    pub async fn status(&self) -> MonitorStatus {
        self.status.read().await.clone()
    }

    /// Cut the current sleep short and run a full cycle. A wake that arrives
    /// mid-cycle makes the following sleep return immediately.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Run until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!("Goal health monitor started");
        loop {
            let interval = tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.run_cycle() => report.next_interval,
            };

            tracing::debug!(interval_secs = interval.as_secs(), "Monitor sleeping");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => tracing::debug!("Monitor woken early"),
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!("Goal health monitor stopped");
    }

    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(Utc::now()).await
    }

    /// Evaluate every due goal in every workspace.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;

        let workspaces = match self.store.list_workspaces().await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!("Monitor could not list workspaces: {}", e);
                self.record_error(e.to_string()).await;
                self.finish_cycle(now).await;
                return CycleReport {
                    evaluations: Vec::new(),
                    failed_workspaces: 0,
                    next_interval: self.config_interval(None),
                };
            }
        };

        let mut evaluations = Vec::new();
        let mut failed_workspaces = 0;
        let mut min_frequency: Option<chrono::Duration> = None;

        for workspace_id in workspaces {
            match self.process_workspace(workspace_id, now, false).await {
                Ok((evals, frequency)) => {
                    evaluations.extend(evals);
                    min_frequency = match (min_frequency, frequency) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                }
                Err(e) => {
                    failed_workspaces += 1;
                    if e.is_transient() {
                        tracing::warn!(%workspace_id, "Monitor skipped workspace: {}", e);
                    } else {
                        tracing::error!(%workspace_id, "Monitor skipped workspace: {}", e);
                    }
                    self.record_error(e.to_string()).await;
                }
            }
        }

        self.finish_cycle(now).await;

        if !evaluations.is_empty() {
            tracing::info!(
                goals = evaluations.len(),
                failed_workspaces,
                "Goal health cycle complete"
            );
        }

        CycleReport {
            evaluations,
            failed_workspaces,
            next_interval: self.config_interval(min_frequency),
        }
    }

    /// Evaluate every active goal of one workspace now, regardless of due-ness.
    pub async fn validate_workspace(&self, workspace_id: WorkspaceId) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        let now = Utc::now();

        match self.process_workspace(workspace_id, now, true).await {
            Ok((evaluations, frequency)) => CycleReport {
                evaluations,
                failed_workspaces: 0,
                next_interval: self.config_interval(frequency),
            },
            Err(e) => {
                tracing::warn!(%workspace_id, "Manual validation failed: {}", e);
                self.record_error(e.to_string()).await;
                CycleReport {
                    evaluations: Vec::new(),
                    failed_workspaces: 1,
                    next_interval: self.config_interval(None),
                }
            }
        }
    }

    /// Returns the evaluations plus the smallest validation frequency among
    /// the workspace's active goals.
    async fn process_workspace(
        &self,
        workspace_id: WorkspaceId,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<(Vec<GoalEvaluation>, Option<chrono::Duration>), StoreError> {
        let goals = self.store.get_active_goals(workspace_id).await?;
        let frequency = goals.iter().map(Goal::validation_frequency).min();

        let due: Vec<&Goal> = goals
            .iter()
            .filter(|g| force || g.is_validation_due(now))
            .collect();
        if due.is_empty() {
            return Ok((Vec::new(), frequency));
        }

        let tasks = self.store.list_tasks(workspace_id, None).await?;
        let agents = self.store.list_agents(workspace_id).await?;
        let health = WorkspaceHealth::compute(
            workspace_id,
            &tasks,
            &goals,
            &agents,
            &self.config.health,
            now,
        );

        let mut evaluations = Vec::with_capacity(due.len());
        for goal in due {
            let outcome = self.evaluate_goal(goal, &health, &tasks).await;
            tracing::debug!(goal_id = %goal.id, ?outcome, "Goal evaluated");

            // Advance regardless of outcome so a failing generator cannot hot-loop
            if let Err(e) = self.store.mark_goal_validated(goal.id, now).await {
                tracing::warn!(goal_id = %goal.id, "Failed to record validation time: {}", e);
            }

            evaluations.push(GoalEvaluation {
                goal_id: goal.id,
                workspace_id,
                outcome,
            });
        }

        self.status.write().await.goals_evaluated += evaluations.len() as u64;
        Ok((evaluations, frequency))
    }

    async fn evaluate_goal(&self, goal: &Goal, health: &WorkspaceHealth, tasks: &[Task]) -> GoalOutcome {
        if goal.is_met() {
            return GoalOutcome::TargetReached;
        }

        if !health.healthy {
            tracing::debug!(
                goal_id = %goal.id,
                active_agents = health.active_agents,
                "Workspace unhealthy, skipping task generation"
            );
            return GoalOutcome::UnhealthyWorkspace;
        }

        let goal_tasks: Vec<&Task> = tasks
            .iter()
            .filter(|t| t.goal_id == Some(goal.id))
            .collect();

        let open_tasks = goal_tasks.iter().filter(|t| t.status.is_open()).count();
        if open_tasks > 0 {
            return GoalOutcome::Progressing { open_tasks };
        }

        if goal.progress_ratio() >= self.config.stall_ratio {
            return GoalOutcome::AboveStallThreshold;
        }

        self.generate_for_goal(goal, health, &goal_tasks).await
    }

    async fn generate_for_goal(
        &self,
        goal: &Goal,
        health: &WorkspaceHealth,
        goal_tasks: &[&Task],
    ) -> GoalOutcome {
        tracing::info!(
            goal_id = %goal.id,
            metric = %goal.metric_type,
            current = goal.current_value,
            target = goal.target_value,
            "Goal stalled, requesting new tasks"
        );

        let context = WorkspaceContext {
            health: health.clone(),
            goal_tasks: goal_tasks.iter().map(|t| TaskSummary::from(*t)).collect(),
        };

        self.status.write().await.generations += 1;

        let proposed = match tokio::time::timeout(
            self.collaborator_timeout,
            self.generator.propose_tasks(goal, &context),
        )
        .await
        {
            Ok(Ok(drafts)) => drafts,
            Ok(Err(e)) => return self.generation_failed(goal, e).await,
            Err(_) => {
                return self
                    .generation_failed(goal, CollaboratorError::Timeout(self.collaborator_timeout))
                    .await
            }
        };

        let mut seen: HashSet<String> = goal_tasks
            .iter()
            .map(|t| t.semantic_hash.clone())
            .collect();

        let total = proposed.len();
        let mut inserted = 0;
        let mut duplicates = 0;

        for draft in proposed {
            let new_task = NewTask::from_draft(goal.workspace_id, Some(goal.id), draft);
            if !seen.insert(new_task.semantic_hash.clone()) {
                duplicates += 1;
                continue;
            }

            match self.store.create_task(new_task).await {
                Ok(task) => {
                    inserted += 1;
                    tracing::info!(goal_id = %goal.id, task_id = %task.id, name = %task.name, "Task generated");
                }
                Err(StoreError::DuplicateTask { semantic_hash, .. }) => {
                    duplicates += 1;
                    tracing::debug!(goal_id = %goal.id, %semantic_hash, "Store rejected duplicate task");
                }
                Err(e) => {
                    tracing::warn!(goal_id = %goal.id, "Failed to insert generated task: {}", e);
                }
            }
        }

        {
            let mut status = self.status.write().await;
            status.tasks_inserted += inserted as u64;
            status.duplicates_skipped += duplicates as u64;
        }

        GoalOutcome::Generated {
            proposed: total,
            inserted,
            duplicates,
        }
    }

    async fn generation_failed(&self, goal: &Goal, error: CollaboratorError) -> GoalOutcome {
        tracing::warn!(
            goal_id = %goal.id,
            retryable = error.is_retryable(),
            "Task generation failed: {}",
            error
        );
        let message = error.to_string();
        self.record_error(message.clone()).await;
        GoalOutcome::GenerationFailed(message)
    }

    async fn finish_cycle(&self, now: DateTime<Utc>) {
        let mut status = self.status.write().await;
        status.cycles += 1;
        status.last_cycle_at = Some(now);
    }

    async fn record_error(&self, message: String) {
        self.status.write().await.last_error = Some(message);
    }

    fn config_interval(&self, min_frequency: Option<chrono::Duration>) -> Duration {
        let min = self.config.min_interval_secs;
        let max = self.config.max_interval_secs.max(min);
        let secs = match min_frequency {
            Some(freq) => (freq.num_seconds().max(0) as u64).clamp(min, max),
            None => self.config.default_interval_secs.clamp(min, max),
        };
        Duration::from_secs(secs)
    }
}
