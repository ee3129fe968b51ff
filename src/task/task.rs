//! Core task types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::goal::GoalId;

pub type TaskId = Uuid;
pub type WorkspaceId = Uuid;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Pending or in progress.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a task failed. Drives the recovery strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Execution exceeded its time budget
    Timeout,
    /// Worker ran but reported an unsuccessful result
    ValidationError,
    /// Worker errored, panicked, or vanished while holding the claim
    WorkerCrash,
    /// A dependency can never complete
    DependencyBlocked,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ValidationError => "validation_error",
            Self::WorkerCrash => "worker_crash",
            Self::DependencyBlocked => "dependency_blocked",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque result payload.
///
/// The core never interprets business content; it only checks size and shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TaskPayload {
    Structured(Map<String, Value>),
    Text(String),
    #[default]
    Absent,
}

impl TaskPayload {
    /// Build a structured payload describing a failure.
    pub fn failure(category: FailureCategory, error: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("error".to_string(), Value::String(error.into()));
        map.insert(
            "category".to_string(),
            Value::String(category.as_str().to_string()),
        );
        TaskPayload::Structured(map)
    }

    /// True for absent payloads, empty maps, and blank text.
    pub fn is_empty(&self) -> bool {
        match self {
            TaskPayload::Structured(map) => map.is_empty(),
            TaskPayload::Text(text) => text.trim().is_empty(),
            TaskPayload::Absent => true,
        }
    }

    /// Payload content as a JSON value (`null` when absent).
    pub fn to_value(&self) -> Value {
        match self {
            TaskPayload::Structured(map) => Value::Object(map.clone()),
            TaskPayload::Text(text) => Value::String(text.clone()),
            TaskPayload::Absent => Value::Null,
        }
    }

    /// Length of the serialized content in characters.
    pub fn serialized_len(&self) -> usize {
        match self {
            TaskPayload::Absent => 0,
            TaskPayload::Text(text) => text.chars().count(),
            TaskPayload::Structured(_) => self.to_value().to_string().chars().count(),
        }
    }
}

/// A unit of work tracked by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub workspace_id: WorkspaceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<GoalId>,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    /// Worker holding the claim, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<String>,
    /// Token of the current claim; only its holder may write the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<Uuid>,
    #[serde(default)]
    pub result: TaskPayload,
    pub semantic_hash: String,
    /// Execution parameters; broadened re-queues patch this map
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Tasks that must complete before this one is ready
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCategory>,
    /// Terminal failure, left for external review
    #[serde(default)]
    pub escalated: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Multiplier applied to the base execution timeout.
    pub fn timeout_scale(&self) -> u32 {
        self.context
            .get("timeout_scale")
            .and_then(Value::as_u64)
            .map(|v| v.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(1)
    }

    /// Failed and no longer eligible for retries.
    pub fn is_terminal_failure(&self) -> bool {
        self.status == TaskStatus::Failed && self.escalated
    }
}

/// A candidate task proposed by the task-generation collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl TaskDraft {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            context: Map::new(),
        }
    }
}

/// What a worker reports after executing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    #[serde(default)]
    pub payload: TaskPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(payload: TaskPayload) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: TaskPayload::Absent,
            error: Some(error.into()),
        }
    }
}
