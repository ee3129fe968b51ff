//! Task store adapter.
//!
//! The store exclusively owns durable state. The orchestration core only
//! reads per-cycle snapshots and mutates through this trait, so every
//! implementation must be safe for concurrent use by all three loops.

mod memory;

pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::deliverable::{Deliverable, NewDeliverable};
use crate::goal::{Goal, GoalId};
use crate::task::{
    semantic_hash, FailureCategory, Task, TaskDraft, TaskId, TaskPayload, TaskStatus, WorkspaceId,
};

/// Errors surfaced by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("goal not found: {0}")]
    GoalNotFound(GoalId),

    /// A task with the same semantic hash already exists in the (workspace, goal) pair.
    #[error("duplicate task {semantic_hash} in workspace {workspace_id}")]
    DuplicateTask {
        workspace_id: WorkspaceId,
        semantic_hash: String,
    },

    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Backend temporarily unreachable; retried next cycle.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Errors worth retrying on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which workspaces a claim may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceScope {
    All,
    Only(WorkspaceId),
}

impl WorkspaceScope {
    pub fn contains(&self, workspace_id: WorkspaceId) -> bool {
        match self {
            WorkspaceScope::All => true,
            WorkspaceScope::Only(id) => *id == workspace_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Offline,
}

/// A worker registered to a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub status: AgentStatus,
}

impl Agent {
    pub fn new(workspace_id: WorkspaceId, name: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            name: name.into(),
            status,
        }
    }
}

/// Input for `TaskStore::create_task`. The semantic hash is derived on construction.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub workspace_id: WorkspaceId,
    pub goal_id: Option<GoalId>,
    pub name: String,
    pub description: String,
    pub context: Map<String, Value>,
    pub depends_on: Vec<TaskId>,
    pub semantic_hash: String,
}

impl NewTask {
    pub fn new(
        workspace_id: WorkspaceId,
        goal_id: Option<GoalId>,
        name: impl Into<String>,
        description: impl Into<String>,
        context: Map<String, Value>,
    ) -> Self {
        let name = name.into();
        let description = description.into();
        let semantic_hash = semantic_hash(&name, &description, goal_id, &context);
        Self {
            workspace_id,
            goal_id,
            name,
            description,
            context,
            depends_on: Vec::new(),
            semantic_hash,
        }
    }

    pub fn from_draft(workspace_id: WorkspaceId, goal_id: Option<GoalId>, draft: TaskDraft) -> Self {
        Self::new(workspace_id, goal_id, draft.name, draft.description, draft.context)
    }

    pub fn with_dependencies(mut self, depends_on: Vec<TaskId>) -> Self {
        self.depends_on = depends_on;
        self
    }
}

/// External persistence contract.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_workspaces(&self) -> StoreResult<Vec<WorkspaceId>>;

    /// Atomically claim up to `limit` pending tasks whose dependencies have all
    /// completed, oldest first. Claimed tasks are `in_progress`, assigned to
    /// `worker_id` and carry a fresh `claim_id` when returned. Tasks with unmet
    /// dependencies are untouched.
    async fn claim_ready_tasks(
        &self,
        scope: WorkspaceScope,
        worker_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Task>>;

    /// Compare-and-swap claim of a single pending task. `None` if someone else won.
    async fn claim_task(&self, task_id: TaskId, worker_id: &str) -> StoreResult<Option<Task>>;

    /// Record the outcome of a claimed execution.
    ///
    /// Only applies while the task is still `in_progress` under `claim_id`.
    /// Returns `false` and leaves the task untouched when the claim has since
    /// been re-queued, escalated or taken over.
    async fn write_task_result(
        &self,
        task_id: TaskId,
        claim_id: Uuid,
        status: TaskStatus,
        result: TaskPayload,
        failure: Option<FailureCategory>,
    ) -> StoreResult<bool>;

    /// Return a task to `pending` with a new retry counter and parameters.
    async fn requeue_task(
        &self,
        task_id: TaskId,
        retry_count: u32,
        context: Map<String, Value>,
    ) -> StoreResult<()>;

    /// Mark a task terminally failed for external review.
    async fn escalate_task(
        &self,
        task_id: TaskId,
        category: FailureCategory,
        reason: &str,
    ) -> StoreResult<()>;

    async fn get_task(&self, task_id: TaskId) -> StoreResult<Task>;

    async fn list_tasks(
        &self,
        workspace_id: WorkspaceId,
        status: Option<TaskStatus>,
    ) -> StoreResult<Vec<Task>>;

    async fn create_task(&self, task: NewTask) -> StoreResult<Task>;

    async fn get_goal(&self, goal_id: GoalId) -> StoreResult<Goal>;

    async fn get_active_goals(&self, workspace_id: WorkspaceId) -> StoreResult<Vec<Goal>>;

    /// Add a strictly positive increment to a goal's current value.
    async fn update_goal_progress(&self, goal_id: GoalId, increment: f64) -> StoreResult<Goal>;

    async fn mark_goal_validated(&self, goal_id: GoalId, at: DateTime<Utc>) -> StoreResult<()>;

    async fn create_deliverable(&self, deliverable: NewDeliverable) -> StoreResult<Deliverable>;

    /// Deliverables of a workspace, newest first. `None` lists every goal's.
    async fn list_deliverables(
        &self,
        workspace_id: WorkspaceId,
        goal_id: Option<GoalId>,
    ) -> StoreResult<Vec<Deliverable>>;

    async fn list_agents(&self, workspace_id: WorkspaceId) -> StoreResult<Vec<Agent>>;
}

/// Shared store handle.
pub type SharedTaskStore = Arc<dyn TaskStore>;
