//! Deliverables - assembled artifacts summarizing completed work.
//!
//! # Key Concepts
//! - Scope: a (workspace, goal?) pair; deliverables are created at most once per
//!   scope per cooldown window
//! - Content: sufficiency checks on task payloads before anything is assembled
//! - Trigger: the per-completion decision and the single assembly call

mod content;
mod trigger;

pub use content::{is_placeholder_only, is_substantial};
pub use trigger::{AggregationTrigger, TriggerOutcome, TriggerStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::goal::GoalId;
use crate::task::WorkspaceId;

/// The (workspace, goal) pair a deliverable summarizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliverableScope {
    pub workspace_id: WorkspaceId,
    pub goal_id: Option<GoalId>,
}

/// Output of the content-assembly collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverableContent {
    pub title: String,
    pub body: serde_json::Value,
}

/// A persisted deliverable. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    pub id: Uuid,
    pub workspace_id: WorkspaceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<GoalId>,
    pub title: String,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Deliverable {
    pub fn scope(&self) -> DeliverableScope {
        DeliverableScope {
            workspace_id: self.workspace_id,
            goal_id: self.goal_id,
        }
    }
}

/// Input for `TaskStore::create_deliverable`.
#[derive(Debug, Clone)]
pub struct NewDeliverable {
    pub scope: DeliverableScope,
    pub content: DeliverableContent,
    pub created_at: DateTime<Utc>,
}
