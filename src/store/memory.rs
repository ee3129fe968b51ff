//! In-memory reference store with optional JSON snapshot persistence.
//!
//! All state sits behind one `RwLock`; claims run under the write lock, which
//! makes them atomic with respect to every other reader and writer.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Agent, NewTask, StoreError, StoreResult, TaskStore, WorkspaceScope};
use crate::deliverable::{Deliverable, NewDeliverable};
use crate::goal::{Goal, GoalId, GoalStatus};
use crate::task::{FailureCategory, Task, TaskId, TaskPayload, TaskStatus, WorkspaceId};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    workspaces: BTreeSet<WorkspaceId>,
    #[serde(default)]
    tasks: HashMap<TaskId, Task>,
    #[serde(default)]
    goals: HashMap<GoalId, Goal>,
    #[serde(default)]
    agents: HashMap<Uuid, Agent>,
    #[serde(default)]
    deliverables: Vec<Deliverable>,
}

impl StoreState {
    fn task_mut(&mut self, id: TaskId) -> StoreResult<&mut Task> {
        self.tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))
    }

    fn dependencies_completed(&self, task: &Task) -> bool {
        task.depends_on.iter().all(|dep| {
            self.tasks
                .get(dep)
                .map(|d| d.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }
}

fn start_claim(task: &mut Task, worker_id: &str, now: DateTime<Utc>) {
    task.status = TaskStatus::InProgress;
    task.assigned_worker = Some(worker_id.to_string());
    task.claim_id = Some(Uuid::new_v4());
    task.started_at = Some(now);
    task.updated_at = now;
}

/// Reference `TaskStore` used by the binary and by tests.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    storage_path: Option<PathBuf>,
}

impl MemoryStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            storage_path: None,
        }
    }

    /// Open a store backed by a JSON snapshot, loading it if present.
    pub async fn open(storage_path: PathBuf) -> Self {
        let state = match Self::load_from_disk(&storage_path) {
            Ok(state) => {
                tracing::info!(
                    "Loaded store snapshot from {} ({} tasks, {} goals)",
                    storage_path.display(),
                    state.tasks.len(),
                    state.goals.len()
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    "No store snapshot at {}, starting empty",
                    storage_path.display()
                );
                StoreState::default()
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load store snapshot from {}: {}, starting empty",
                    storage_path.display(),
                    e
                );
                StoreState::default()
            }
        };

        Self {
            state: RwLock::new(state),
            storage_path: Some(storage_path),
        }
    }

    fn load_from_disk(path: &PathBuf) -> Result<StoreState, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Persist the snapshot. Failures are logged; in-memory state stays authoritative.
    fn save_to_disk(&self, state: &StoreState) {
        let Some(path) = &self.storage_path else {
            return;
        };

        let result = (|| -> Result<(), std::io::Error> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(state)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, contents)?;
            std::fs::rename(&tmp, path)
        })();

        if let Err(e) = result {
            tracing::error!("Failed to save store snapshot to {}: {}", path.display(), e);
        }
    }

    // ==================== Seeding ====================

    pub async fn add_workspace(&self, workspace_id: WorkspaceId) {
        let mut state = self.state.write().await;
        state.workspaces.insert(workspace_id);
        self.save_to_disk(&state);
    }

    pub async fn insert_goal(&self, goal: Goal) -> GoalId {
        let id = goal.id;
        let mut state = self.state.write().await;
        state.workspaces.insert(goal.workspace_id);
        state.goals.insert(id, goal);
        self.save_to_disk(&state);
        id
    }

    pub async fn insert_agent(&self, agent: Agent) -> Uuid {
        let id = agent.id;
        let mut state = self.state.write().await;
        state.workspaces.insert(agent.workspace_id);
        state.agents.insert(id, agent);
        self.save_to_disk(&state);
        id
    }

    /// Insert a fully formed task, bypassing dedup. Used to restore or seed state.
    pub async fn insert_task(&self, task: Task) -> TaskId {
        let id = task.id;
        let mut state = self.state.write().await;
        state.workspaces.insert(task.workspace_id);
        state.tasks.insert(id, task);
        self.save_to_disk(&state);
        id
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_workspaces(&self) -> StoreResult<Vec<WorkspaceId>> {
        let state = self.state.read().await;
        Ok(state.workspaces.iter().copied().collect())
    }

    async fn claim_ready_tasks(
        &self,
        scope: WorkspaceScope,
        worker_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut state = self.state.write().await;

        let mut ready: Vec<(DateTime<Utc>, TaskId)> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && scope.contains(t.workspace_id))
            .filter(|t| state.dependencies_completed(t))
            .map(|t| (t.created_at, t.id))
            .collect();
        ready.sort();
        ready.truncate(limit);

        if ready.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(ready.len());
        for (_, id) in ready {
            let task = state.task_mut(id)?;
            start_claim(task, worker_id, now);
            claimed.push(task.clone());
        }

        self.save_to_disk(&state);
        Ok(claimed)
    }

    async fn claim_task(&self, task_id: TaskId, worker_id: &str) -> StoreResult<Option<Task>> {
        let mut state = self.state.write().await;
        let task = state.task_mut(task_id)?;
        if task.status != TaskStatus::Pending {
            return Ok(None);
        }

        start_claim(task, worker_id, Utc::now());
        let claimed = task.clone();
        self.save_to_disk(&state);
        Ok(Some(claimed))
    }

    async fn write_task_result(
        &self,
        task_id: TaskId,
        claim_id: Uuid,
        status: TaskStatus,
        result: TaskPayload,
        failure: Option<FailureCategory>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let task = state.task_mut(task_id)?;
        if task.status != TaskStatus::InProgress || task.claim_id != Some(claim_id) {
            tracing::debug!(
                %task_id,
                status = %task.status,
                "Ignoring result from a claim that no longer holds the task"
            );
            return Ok(false);
        }

        task.status = status;
        task.result = result;
        task.failure = failure;
        task.claim_id = None;
        task.updated_at = Utc::now();
        self.save_to_disk(&state);
        Ok(true)
    }

    async fn requeue_task(
        &self,
        task_id: TaskId,
        retry_count: u32,
        context: Map<String, Value>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let task = state.task_mut(task_id)?;
        if task.escalated {
            return Err(StoreError::Invariant(format!(
                "task {} is terminally failed and cannot be re-queued",
                task_id
            )));
        }
        if retry_count <= task.retry_count {
            return Err(StoreError::Invariant(format!(
                "retry counter for task {} must increase ({} -> {})",
                task_id, task.retry_count, retry_count
            )));
        }

        task.status = TaskStatus::Pending;
        task.retry_count = retry_count;
        task.context = context;
        task.assigned_worker = None;
        task.claim_id = None;
        task.started_at = None;
        task.result = TaskPayload::Absent;
        task.failure = None;
        task.updated_at = Utc::now();
        self.save_to_disk(&state);
        Ok(())
    }

    async fn escalate_task(
        &self,
        task_id: TaskId,
        category: FailureCategory,
        reason: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let task = state.task_mut(task_id)?;
        task.status = TaskStatus::Failed;
        task.escalated = true;
        task.failure = Some(category);
        task.assigned_worker = None;
        task.claim_id = None;
        task.result = TaskPayload::failure(category, reason);
        task.updated_at = Utc::now();
        self.save_to_disk(&state);
        Ok(())
    }

    async fn get_task(&self, task_id: TaskId) -> StoreResult<Task> {
        let state = self.state.read().await;
        state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    async fn list_tasks(
        &self,
        workspace_id: WorkspaceId,
        status: Option<TaskStatus>,
    ) -> StoreResult<Vec<Task>> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.workspace_id == workspace_id)
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn create_task(&self, new: NewTask) -> StoreResult<Task> {
        let mut state = self.state.write().await;

        let duplicate = state.tasks.values().any(|t| {
            t.workspace_id == new.workspace_id
                && t.goal_id == new.goal_id
                && t.semantic_hash == new.semantic_hash
        });
        if duplicate {
            return Err(StoreError::DuplicateTask {
                workspace_id: new.workspace_id,
                semantic_hash: new.semantic_hash,
            });
        }

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            workspace_id: new.workspace_id,
            goal_id: new.goal_id,
            name: new.name,
            description: new.description,
            status: TaskStatus::Pending,
            assigned_worker: None,
            claim_id: None,
            result: TaskPayload::Absent,
            semantic_hash: new.semantic_hash,
            context: new.context,
            depends_on: new.depends_on,
            failure: None,
            escalated: false,
            retry_count: 0,
            started_at: None,
            created_at: now,
            updated_at: now,
        };

        state.workspaces.insert(task.workspace_id);
        state.tasks.insert(task.id, task.clone());
        self.save_to_disk(&state);
        Ok(task)
    }

    async fn get_goal(&self, goal_id: GoalId) -> StoreResult<Goal> {
        let state = self.state.read().await;
        state
            .goals
            .get(&goal_id)
            .cloned()
            .ok_or(StoreError::GoalNotFound(goal_id))
    }

    async fn get_active_goals(&self, workspace_id: WorkspaceId) -> StoreResult<Vec<Goal>> {
        let state = self.state.read().await;
        let mut goals: Vec<Goal> = state
            .goals
            .values()
            .filter(|g| g.workspace_id == workspace_id && g.status == GoalStatus::Active)
            .cloned()
            .collect();
        goals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(goals)
    }

    async fn update_goal_progress(&self, goal_id: GoalId, increment: f64) -> StoreResult<Goal> {
        if !increment.is_finite() || increment <= 0.0 {
            return Err(StoreError::Invariant(format!(
                "goal progress increment must be positive, got {}",
                increment
            )));
        }

        let mut state = self.state.write().await;
        let goal = state
            .goals
            .get_mut(&goal_id)
            .ok_or(StoreError::GoalNotFound(goal_id))?;
        goal.current_value += increment;
        if goal.status == GoalStatus::Active && goal.is_met() {
            goal.status = GoalStatus::Achieved;
        }
        let updated = goal.clone();
        self.save_to_disk(&state);
        Ok(updated)
    }

    async fn mark_goal_validated(&self, goal_id: GoalId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let goal = state
            .goals
            .get_mut(&goal_id)
            .ok_or(StoreError::GoalNotFound(goal_id))?;
        goal.last_validation_at = Some(at);
        self.save_to_disk(&state);
        Ok(())
    }

    async fn create_deliverable(&self, new: NewDeliverable) -> StoreResult<Deliverable> {
        let mut state = self.state.write().await;
        let deliverable = Deliverable {
            id: Uuid::new_v4(),
            workspace_id: new.scope.workspace_id,
            goal_id: new.scope.goal_id,
            title: new.content.title,
            content: new.content.body,
            created_at: new.created_at,
        };
        state.deliverables.push(deliverable.clone());
        self.save_to_disk(&state);
        Ok(deliverable)
    }

    async fn list_deliverables(
        &self,
        workspace_id: WorkspaceId,
        goal_id: Option<GoalId>,
    ) -> StoreResult<Vec<Deliverable>> {
        let state = self.state.read().await;
        let mut deliverables: Vec<Deliverable> = state
            .deliverables
            .iter()
            .filter(|d| d.workspace_id == workspace_id)
            .filter(|d| goal_id.is_none() || d.goal_id == goal_id)
            .cloned()
            .collect();
        deliverables.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deliverables)
    }

    async fn list_agents(&self, workspace_id: WorkspaceId) -> StoreResult<Vec<Agent>> {
        let state = self.state.read().await;
        Ok(state
            .agents
            .values()
            .filter(|a| a.workspace_id == workspace_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AgentStatus;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn new_task(ws: WorkspaceId, name: &str) -> NewTask {
        NewTask::new(ws, None, name, "desc", Map::new())
    }

    #[tokio::test]
    async fn test_duplicate_hash_rejected() {
        let store = MemoryStore::in_memory();
        let ws = Uuid::new_v4();

        store.create_task(new_task(ws, "Collect leads")).await.unwrap();
        let err = store
            .create_task(new_task(ws, "  collect   LEADS "))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTask { .. }));

        // Same content in another workspace is fine
        store
            .create_task(new_task(Uuid::new_v4(), "Collect leads"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_claim_skips_unmet_dependencies() {
        let store = MemoryStore::in_memory();
        let ws = Uuid::new_v4();

        let first = store.create_task(new_task(ws, "first")).await.unwrap();
        let second = store
            .create_task(new_task(ws, "second").with_dependencies(vec![first.id]))
            .await
            .unwrap();

        let claimed = store
            .claim_ready_tasks(WorkspaceScope::All, "w1", 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, first.id);
        assert_eq!(claimed[0].status, TaskStatus::InProgress);
        assert_eq!(claimed[0].assigned_worker.as_deref(), Some("w1"));

        let untouched = store.get_task(second.id).await.unwrap();
        assert_eq!(untouched.status, TaskStatus::Pending);
        assert!(untouched.assigned_worker.is_none());

        let claim_id = claimed[0].claim_id.unwrap();
        assert!(store
            .write_task_result(first.id, claim_id, TaskStatus::Completed, TaskPayload::Absent, None)
            .await
            .unwrap());
        let claimed = store
            .claim_ready_tasks(WorkspaceScope::Only(ws), "w1", 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, second.id);
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_exclusive() {
        let store = Arc::new(MemoryStore::in_memory());
        let ws = Uuid::new_v4();
        for i in 0..50 {
            store
                .create_task(new_task(ws, &format!("task {}", i)))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let batch = store
                        .claim_ready_tasks(WorkspaceScope::All, &format!("w{}", worker), 3)
                        .await
                        .unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    mine.extend(batch.into_iter().map(|t| t.id));
                    tokio::task::yield_now().await;
                }
                mine
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<TaskId> = all.iter().copied().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
    }

    #[tokio::test]
    async fn test_claim_task_is_compare_and_swap() {
        let store = MemoryStore::in_memory();
        let task = store
            .create_task(new_task(Uuid::new_v4(), "once"))
            .await
            .unwrap();

        let won = store.claim_task(task.id, "a").await.unwrap().unwrap();
        assert!(won.claim_id.is_some());
        assert!(store.claim_task(task.id, "b").await.unwrap().is_none());
        let stored = store.get_task(task.id).await.unwrap();
        assert_eq!(stored.assigned_worker.as_deref(), Some("a"));
        assert_eq!(stored.claim_id, won.claim_id);
    }

    #[tokio::test]
    async fn test_result_write_requires_current_claim() {
        let store = MemoryStore::in_memory();
        let task = store
            .create_task(new_task(Uuid::new_v4(), "contested"))
            .await
            .unwrap();

        let first = store.claim_task(task.id, "w").await.unwrap().unwrap();
        let first_claim = first.claim_id.unwrap();

        // Recovery takes the task back and it is claimed again
        store.requeue_task(task.id, 1, Map::new()).await.unwrap();
        let second = store.claim_task(task.id, "w").await.unwrap().unwrap();
        let second_claim = second.claim_id.unwrap();
        assert_ne!(first_claim, second_claim);

        let late = TaskPayload::Text("late".into());
        assert!(!store
            .write_task_result(task.id, first_claim, TaskStatus::Completed, late, None)
            .await
            .unwrap());
        let stored = store.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::InProgress);
        assert_eq!(stored.claim_id, Some(second_claim));
        assert_eq!(stored.result, TaskPayload::Absent);

        assert!(store
            .write_task_result(task.id, second_claim, TaskStatus::Completed, TaskPayload::Absent, None)
            .await
            .unwrap());
        // A finished task accepts no further writes, even from its last claim
        assert!(!store
            .write_task_result(task.id, second_claim, TaskStatus::Failed, TaskPayload::Absent, None)
            .await
            .unwrap());
        let done = store.get_task(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.claim_id.is_none());
    }

    #[tokio::test]
    async fn test_goal_progress_is_monotonic() {
        let store = MemoryStore::in_memory();
        let goal = Goal::new(Uuid::new_v4(), "g", "contacts", 5.0);
        let id = store.insert_goal(goal).await;

        assert!(store.update_goal_progress(id, -1.0).await.is_err());
        assert!(store.update_goal_progress(id, f64::NAN).await.is_err());

        let updated = store.update_goal_progress(id, 5.0).await.unwrap();
        assert_eq!(updated.current_value, 5.0);
        assert_eq!(updated.status, GoalStatus::Achieved);
    }

    #[tokio::test]
    async fn test_requeue_requires_increasing_counter() {
        let store = MemoryStore::in_memory();
        let task = store
            .create_task(new_task(Uuid::new_v4(), "retry me"))
            .await
            .unwrap();

        assert!(store.requeue_task(task.id, 0, Map::new()).await.is_err());
        store.requeue_task(task.id, 1, Map::new()).await.unwrap();

        store
            .escalate_task(task.id, FailureCategory::Timeout, "gave up")
            .await
            .unwrap();
        assert!(store.requeue_task(task.id, 2, Map::new()).await.is_err());
        assert!(store.get_task(task.id).await.unwrap().is_terminal_failure());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");
        let ws = Uuid::new_v4();

        {
            let store = MemoryStore::open(path.clone()).await;
            store.insert_agent(Agent::new(ws, "a", AgentStatus::Active)).await;
            store.create_task(new_task(ws, "persist me")).await.unwrap();
        }

        let reopened = MemoryStore::open(path).await;
        assert_eq!(reopened.list_workspaces().await.unwrap(), vec![ws]);
        assert_eq!(reopened.list_tasks(ws, None).await.unwrap().len(), 1);
        assert_eq!(reopened.list_agents(ws).await.unwrap().len(), 1);
    }
}
