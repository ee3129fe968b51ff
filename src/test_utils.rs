//! Fixtures and fake collaborators shared by unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::deliverable::{Deliverable, DeliverableContent, NewDeliverable};
use crate::goal::{Goal, GoalId};
use crate::reasoning::{CollaboratorError, ContentAssembler, TaskGenerator, WorkspaceContext};
use crate::store::{
    Agent, AgentStatus, MemoryStore, NewTask, StoreError, StoreResult, TaskStore, WorkspaceScope,
};
use crate::task::{
    semantic_hash, FailureCategory, Task, TaskDraft, TaskId, TaskPayload, TaskResult, TaskStatus,
    WorkspaceId,
};
use crate::worker::{Worker, WorkerError};

pub fn task_with_status(
    workspace_id: WorkspaceId,
    goal_id: Option<GoalId>,
    name: &str,
    status: TaskStatus,
) -> Task {
    let now = Utc::now();
    Task {
        id: Uuid::new_v4(),
        workspace_id,
        goal_id,
        name: name.to_string(),
        description: String::new(),
        status,
        assigned_worker: None,
        claim_id: None,
        result: TaskPayload::Absent,
        semantic_hash: semantic_hash(name, "", goal_id, &Map::new()),
        context: Map::new(),
        depends_on: Vec::new(),
        failure: None,
        escalated: false,
        retry_count: 0,
        started_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Claim a pending task and record its outcome, as a worker would.
pub async fn finish_task(
    store: &MemoryStore,
    task_id: TaskId,
    status: TaskStatus,
    result: TaskPayload,
    failure: Option<FailureCategory>,
) -> Task {
    let claimed = store
        .claim_task(task_id, "test-worker")
        .await
        .unwrap()
        .expect("task was not pending");
    let claim_id = claimed.claim_id.unwrap();
    assert!(store
        .write_task_result(task_id, claim_id, status, result, failure)
        .await
        .unwrap());
    store.get_task(task_id).await.unwrap()
}

pub fn agent(workspace_id: WorkspaceId, status: AgentStatus) -> Agent {
    Agent::new(workspace_id, "agent", status)
}

/// Structured payload from a JSON object literal.
pub fn structured(value: Value) -> TaskPayload {
    match value {
        Value::Object(map) => TaskPayload::Structured(map),
        other => panic!("structured payload needs an object, got {}", other),
    }
}

// ===== Task generator =====

pub struct FakeGenerator {
    drafts: Vec<TaskDraft>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn returning(drafts: Vec<TaskDraft>) -> Self {
        Self {
            drafts,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            drafts: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskGenerator for FakeGenerator {
    async fn propose_tasks(
        &self,
        _goal: &Goal,
        _context: &WorkspaceContext,
    ) -> Result<Vec<TaskDraft>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CollaboratorError::Http {
                status: 503,
                body: "overloaded".to_string(),
            });
        }
        Ok(self.drafts.clone())
    }
}

// ===== Content assembler =====

pub struct FakeAssembler {
    fail_first: usize,
    calls: AtomicUsize,
}

impl FakeAssembler {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_first: n,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentAssembler for FakeAssembler {
    async fn assemble_deliverable(
        &self,
        goal: Option<&Goal>,
        completed_tasks: &[Task],
    ) -> Result<DeliverableContent, CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers pile up on the scope lock
        tokio::time::sleep(Duration::from_millis(20)).await;
        if call < self.fail_first {
            return Err(CollaboratorError::Network("connection reset".to_string()));
        }
        Ok(DeliverableContent {
            title: goal
                .map(|g| format!("Report: {}", g.description))
                .unwrap_or_else(|| "Workspace report".to_string()),
            body: serde_json::json!({
                "tasks": completed_tasks.iter().map(|t| t.name.clone()).collect::<Vec<_>>()
            }),
        })
    }
}

// ===== Worker =====

#[derive(Clone)]
pub enum WorkerBehavior {
    Succeed(TaskPayload),
    ReportFailure(String),
    Error(String),
    Panic,
    /// Sleep, then succeed with an absent payload
    Sleep(Duration),
}

pub struct FakeWorker {
    behavior: WorkerBehavior,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeWorker {
    pub fn new(behavior: WorkerBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of executions observed at the same time.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for FakeWorker {
    async fn execute(&self, _task: Task) -> Result<TaskResult, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let result = match &self.behavior {
            WorkerBehavior::Succeed(payload) => Ok(TaskResult::success(payload.clone())),
            WorkerBehavior::ReportFailure(msg) => Ok(TaskResult::failure(msg.clone())),
            WorkerBehavior::Error(msg) => Err(WorkerError::Execution(msg.clone())),
            WorkerBehavior::Panic => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("worker exploded");
            }
            WorkerBehavior::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(TaskResult::success(TaskPayload::Absent))
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ===== Store =====

/// Wraps a `MemoryStore` and fails calls on demand.
///
/// `set_down(true)` fails every call. `fail_workspace` fails only the calls
/// that read or write that workspace's records.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    down: AtomicBool,
    failing: Mutex<HashSet<WorkspaceId>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_workspace(&self, workspace_id: WorkspaceId) {
        self.failing.lock().unwrap().insert(workspace_id);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_workspace(&self, workspace_id: WorkspaceId) -> StoreResult<()> {
        self.check()?;
        if self.failing.lock().unwrap().contains(&workspace_id) {
            return Err(StoreError::Unavailable(format!(
                "workspace {} unreachable",
                workspace_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn list_workspaces(&self) -> StoreResult<Vec<WorkspaceId>> {
        self.check()?;
        self.inner.list_workspaces().await
    }

    async fn claim_ready_tasks(
        &self,
        scope: WorkspaceScope,
        worker_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Task>> {
        self.check()?;
        if let WorkspaceScope::Only(workspace_id) = scope {
            self.check_workspace(workspace_id)?;
        }
        self.inner.claim_ready_tasks(scope, worker_id, limit).await
    }

    async fn claim_task(&self, task_id: TaskId, worker_id: &str) -> StoreResult<Option<Task>> {
        self.check()?;
        self.inner.claim_task(task_id, worker_id).await
    }

    async fn write_task_result(
        &self,
        task_id: TaskId,
        claim_id: Uuid,
        status: TaskStatus,
        result: TaskPayload,
        failure: Option<FailureCategory>,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner
            .write_task_result(task_id, claim_id, status, result, failure)
            .await
    }

    async fn requeue_task(
        &self,
        task_id: TaskId,
        retry_count: u32,
        context: Map<String, Value>,
    ) -> StoreResult<()> {
        self.check()?;
        self.inner.requeue_task(task_id, retry_count, context).await
    }

    async fn escalate_task(
        &self,
        task_id: TaskId,
        category: FailureCategory,
        reason: &str,
    ) -> StoreResult<()> {
        self.check()?;
        self.inner.escalate_task(task_id, category, reason).await
    }

    async fn get_task(&self, task_id: TaskId) -> StoreResult<Task> {
        self.check()?;
        self.inner.get_task(task_id).await
    }

    async fn list_tasks(
        &self,
        workspace_id: WorkspaceId,
        status: Option<TaskStatus>,
    ) -> StoreResult<Vec<Task>> {
        self.check_workspace(workspace_id)?;
        self.inner.list_tasks(workspace_id, status).await
    }

    async fn create_task(&self, task: NewTask) -> StoreResult<Task> {
        self.check_workspace(task.workspace_id)?;
        self.inner.create_task(task).await
    }

    async fn get_goal(&self, goal_id: GoalId) -> StoreResult<Goal> {
        self.check()?;
        self.inner.get_goal(goal_id).await
    }

    async fn get_active_goals(&self, workspace_id: WorkspaceId) -> StoreResult<Vec<Goal>> {
        self.check_workspace(workspace_id)?;
        self.inner.get_active_goals(workspace_id).await
    }

    async fn update_goal_progress(&self, goal_id: GoalId, increment: f64) -> StoreResult<Goal> {
        self.check()?;
        self.inner.update_goal_progress(goal_id, increment).await
    }

    async fn mark_goal_validated(&self, goal_id: GoalId, at: DateTime<Utc>) -> StoreResult<()> {
        self.check()?;
        self.inner.mark_goal_validated(goal_id, at).await
    }

    async fn create_deliverable(&self, deliverable: NewDeliverable) -> StoreResult<Deliverable> {
        self.check_workspace(deliverable.scope.workspace_id)?;
        self.inner.create_deliverable(deliverable).await
    }

    async fn list_deliverables(
        &self,
        workspace_id: WorkspaceId,
        goal_id: Option<GoalId>,
    ) -> StoreResult<Vec<Deliverable>> {
        self.check_workspace(workspace_id)?;
        self.inner.list_deliverables(workspace_id, goal_id).await
    }

    async fn list_agents(&self, workspace_id: WorkspaceId) -> StoreResult<Vec<Agent>> {
        self.check_workspace(workspace_id)?;
        self.inner.list_agents(workspace_id).await
    }
}
