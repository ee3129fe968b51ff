//! Reasoning collaborators: task generation and deliverable assembly.
//!
//! The core never interprets natural language. It hands a goal and a
//! workspace context to an external service and treats the answer as
//! untrusted input.

mod error;
mod http;

pub use error::{classify_http_status, CollaboratorError, HttpErrorClass};
pub use http::HttpReasoningClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::deliverable::DeliverableContent;
use crate::goal::{Goal, WorkspaceHealth};
use crate::task::{Task, TaskDraft, TaskStatus};

/// Compact view of an existing task, sent along with generation requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub name: String,
    pub status: TaskStatus,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            name: task.name.clone(),
            status: task.status,
        }
    }
}

/// What the generator gets to see about a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceContext {
    pub health: WorkspaceHealth,
    /// Tasks already linked to the goal being planned
    pub goal_tasks: Vec<TaskSummary>,
}

/// Proposes new tasks for a stalled goal. May be slow, fail, or return nothing.
#[async_trait]
pub trait TaskGenerator: Send + Sync {
    async fn propose_tasks(
        &self,
        goal: &Goal,
        context: &WorkspaceContext,
    ) -> Result<Vec<TaskDraft>, CollaboratorError>;
}

/// Assembles a deliverable from the completed tasks of a scope.
#[async_trait]
pub trait ContentAssembler: Send + Sync {
    async fn assemble_deliverable(
        &self,
        goal: Option<&Goal>,
        completed_tasks: &[Task],
    ) -> Result<DeliverableContent, CollaboratorError>;
}

pub type SharedTaskGenerator = Arc<dyn TaskGenerator>;
pub type SharedContentAssembler = Arc<dyn ContentAssembler>;
