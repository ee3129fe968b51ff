//! Wiring of the three loops around one shared store.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::deliverable::{AggregationTrigger, TriggerStatus};
use crate::executor::{AdaptiveExecutor, ExecutorStatus};
use crate::goal::{CycleReport, GoalHealthMonitor, MonitorStatus, WorkspaceHealth};
use crate::reasoning::{SharedContentAssembler, SharedTaskGenerator};
use crate::recovery::{RecoveryCoordinator, RecoveryReport, RecoveryStatus};
use crate::store::{SharedTaskStore, StoreError};
use crate::task::WorkspaceId;
use crate::worker::SharedWorker;

/// Snapshot for operators.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub executor: ExecutorStatus,
    pub monitor: MonitorStatus,
    pub recovery: RecoveryStatus,
    pub deliverables: TriggerStatus,
    /// Computed fresh from the store on every call
    pub workspaces: Vec<WorkspaceHealth>,
}

pub struct Orchestrator {
    config: Config,
    store: SharedTaskStore,
    executor: Arc<AdaptiveExecutor>,
    monitor: Arc<GoalHealthMonitor>,
    recovery: Arc<RecoveryCoordinator>,
    trigger: Arc<AggregationTrigger>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        store: SharedTaskStore,
        worker: SharedWorker,
        generator: SharedTaskGenerator,
        assembler: SharedContentAssembler,
    ) -> Arc<Self> {
        let collaborator_timeout = config.collaborator_timeout();

        let trigger = Arc::new(AggregationTrigger::new(
            Arc::clone(&store),
            assembler,
            config.trigger.clone(),
            collaborator_timeout,
        ));
        let executor = Arc::new(AdaptiveExecutor::new(
            config.executor.clone(),
            Arc::clone(&store),
            worker,
            Arc::clone(&trigger),
        ));
        let monitor = Arc::new(GoalHealthMonitor::new(
            Arc::clone(&store),
            generator,
            config.monitor.clone(),
            collaborator_timeout,
        ));
        let recovery = Arc::new(RecoveryCoordinator::new(
            Arc::clone(&store),
            config.recovery.clone(),
            config.executor.task_timeout(),
        ));

        Arc::new(Self {
            config,
            store,
            executor,
            monitor,
            recovery,
            trigger,
        })
    }

    /// Spawn the executor, monitor and recovery loops on a shared token.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> RunningOrchestrator {
        tracing::info!("Starting orchestration loops");
        let handles = vec![
            tokio::spawn(Arc::clone(&self.executor).run(cancel.clone())),
            tokio::spawn(Arc::clone(&self.monitor).run(cancel.clone())),
            tokio::spawn(Arc::clone(&self.recovery).run(cancel.clone())),
        ];
        RunningOrchestrator { cancel, handles }
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let workspaces = match self.workspace_health().await {
            Ok(health) => health,
            Err(e) => {
                tracing::warn!("Failed to compute workspace health: {}", e);
                Vec::new()
            }
        };

        OrchestratorStatus {
            executor: self.executor.status().await,
            monitor: self.monitor.status().await,
            recovery: self.recovery.status().await,
            deliverables: self.trigger.status().await,
            workspaces,
        }
    }

    async fn workspace_health(&self) -> Result<Vec<WorkspaceHealth>, StoreError> {
        let now = Utc::now();
        let mut snapshots = Vec::new();
        for workspace_id in self.store.list_workspaces().await? {
            let tasks = self.store.list_tasks(workspace_id, None).await?;
            let goals = self.store.get_active_goals(workspace_id).await?;
            let agents = self.store.list_agents(workspace_id).await?;
            snapshots.push(WorkspaceHealth::compute(
                workspace_id,
                &tasks,
                &goals,
                &agents,
                &self.config.monitor.health,
                now,
            ));
        }
        Ok(snapshots)
    }

    /// Validate every active goal of a workspace now.
    pub async fn trigger_validation(&self, workspace_id: WorkspaceId) -> CycleReport {
        tracing::info!(%workspace_id, "Manual validation requested");
        self.monitor.validate_workspace(workspace_id).await
    }

    /// Have the running monitor loop start its next cycle now, covering
    /// goals that became due since it went to sleep.
    pub fn wake_monitor(&self) {
        tracing::info!("Monitor wake requested");
        self.monitor.wake();
    }

    /// Run one recovery cycle now.
    pub async fn trigger_recovery(&self) -> RecoveryReport {
        tracing::info!("Manual recovery requested");
        self.recovery.run_now().await
    }
}

/// Handle to the running loops.
pub struct RunningOrchestrator {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl RunningOrchestrator {
    /// Signal every loop to stop and wait for them.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!("Orchestration loop ended abnormally: {}", e);
            }
        }
        tracing::info!("Orchestration loops stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::Goal;
    use crate::store::{Agent, AgentStatus, MemoryStore, TaskStore};
    use crate::task::{TaskDraft, TaskPayload, TaskStatus};
    use crate::test_utils::{FakeAssembler, FakeGenerator, FakeWorker, WorkerBehavior};
    use std::time::Duration;
    use uuid::Uuid;

    fn orchestrator(store: Arc<MemoryStore>, generator: Arc<FakeGenerator>) -> Arc<Orchestrator> {
        let mut config = Config::default();
        config.executor.idle_interval_ms = 10;
        config.executor.intervals.low_ms = 10;
        config.executor.intervals.normal_ms = 10;
        Orchestrator::new(
            config,
            store,
            Arc::new(FakeWorker::new(WorkerBehavior::Succeed(TaskPayload::Text(
                "done".into(),
            )))),
            generator,
            Arc::new(FakeAssembler::new()),
        )
    }

    #[tokio::test]
    async fn test_generated_tasks_are_executed_end_to_end() {
        let store = Arc::new(MemoryStore::in_memory());
        let ws = Uuid::new_v4();
        store
            .insert_agent(Agent::new(ws, "worker", AgentStatus::Active))
            .await;
        store.insert_goal(Goal::new(ws, "g", "items", 5.0)).await;

        let generator = Arc::new(FakeGenerator::returning(vec![
            TaskDraft::new("collect items", "batch one"),
            TaskDraft::new("collect items", "batch two"),
        ]));
        let orchestrator = orchestrator(Arc::clone(&store), Arc::clone(&generator));
        let running = orchestrator.start(CancellationToken::new());

        for _ in 0..200 {
            let done = store
                .list_tasks(ws, Some(TaskStatus::Completed))
                .await
                .unwrap();
            if done.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        running.shutdown().await;

        assert_eq!(generator.calls(), 1);
        let completed = store
            .list_tasks(ws, Some(TaskStatus::Completed))
            .await
            .unwrap();
        assert_eq!(completed.len(), 2);

        let status = orchestrator.status().await;
        assert_eq!(status.executor.completed_total, 2);
        assert_eq!(status.monitor.tasks_inserted, 2);
        assert_eq!(status.workspaces.len(), 1);
        assert_eq!(status.workspaces[0].completed_tasks, 2);
    }

    #[tokio::test]
    async fn test_manual_commands() {
        let store = Arc::new(MemoryStore::in_memory());
        let ws = Uuid::new_v4();
        store
            .insert_agent(Agent::new(ws, "worker", AgentStatus::Active))
            .await;
        let mut goal = Goal::new(ws, "g", "items", 5.0);
        goal.last_validation_at = Some(Utc::now());
        store.insert_goal(goal).await;

        let generator = Arc::new(FakeGenerator::returning(vec![TaskDraft::new("x", "")]));
        let orchestrator = orchestrator(Arc::clone(&store), Arc::clone(&generator));

        let report = orchestrator.trigger_validation(ws).await;
        assert_eq!(report.evaluations.len(), 1);
        assert_eq!(generator.calls(), 1);

        assert!(orchestrator.trigger_recovery().await.is_empty());
        assert_eq!(orchestrator.status().await.recovery.cycles, 1);
    }

    #[tokio::test]
    async fn test_wake_monitor_picks_up_new_goal() {
        let store = Arc::new(MemoryStore::in_memory());
        let ws = Uuid::new_v4();
        store
            .insert_agent(Agent::new(ws, "worker", AgentStatus::Active))
            .await;
        let generator = Arc::new(FakeGenerator::returning(vec![TaskDraft::new("x", "")]));
        let orchestrator = orchestrator(Arc::clone(&store), Arc::clone(&generator));
        let running = orchestrator.start(CancellationToken::new());

        while orchestrator.status().await.monitor.cycles == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        store.insert_goal(Goal::new(ws, "g", "items", 5.0)).await;
        orchestrator.wake_monitor();

        for _ in 0..200 {
            if generator.calls() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        running.shutdown().await;
        assert_eq!(generator.calls(), 1);
    }
}
